use std::path::PathBuf;

/// Broad class of a [`DocumentError`], used to pick the user-facing message and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The submission itself is wrong or incomplete; the user can fix it.
    Data,
    /// The document could not be produced from otherwise valid input.
    Structural,
    /// Scratch storage failed.
    Resource,
    /// Startup configuration or protocol files are invalid.
    Configuration,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid date in field {field}: {value:?}")]
    InvalidDate { field: String, value: String },
    #[error("medication not found: {0}")]
    MedicationNotFound(String),
    #[error("no protocol configured for disease code {0}")]
    ProtocolNotFound(String),
    #[error("protocol template missing: {}", .0.display())]
    ProtocolTemplateMissing(PathBuf),
    #[error("no template could be filled")]
    NoContentProduced,
    #[error("concatenation failed: {0}")]
    ConcatenationFailed(String),
    #[error("filling {} failed: {reason}", template.display())]
    FillFailed { template: PathBuf, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read configuration file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration file {} does not match schema at {at}: {message}", path.display())]
    ConfigParse {
        path: PathBuf,
        at: String,
        message: String,
    },
    #[error("scratch storage error: {0}")]
    Scratch(#[from] lme_scratch::ScratchError),
}

impl DocumentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DocumentError::MissingField(_)
            | DocumentError::InvalidDate { .. }
            | DocumentError::MedicationNotFound(_)
            | DocumentError::InvalidInput(_) => ErrorCategory::Data,
            DocumentError::ProtocolNotFound(_)
            | DocumentError::ProtocolTemplateMissing(_)
            | DocumentError::NoContentProduced
            | DocumentError::ConcatenationFailed(_)
            | DocumentError::FillFailed { .. } => ErrorCategory::Structural,
            DocumentError::Scratch(_) => ErrorCategory::Resource,
            DocumentError::ConfigRead { .. } | DocumentError::ConfigParse { .. } => {
                ErrorCategory::Configuration
            }
        }
    }

    /// Message safe to show to the person who submitted the form.
    ///
    /// Data errors name the problem; everything else collapses to a generic message, the
    /// specific reason being available through `Display` for logs.
    pub fn user_message(&self) -> String {
        match self {
            DocumentError::MissingField(field) => format!("O campo {field} é obrigatório."),
            DocumentError::InvalidDate { field, .. } => {
                format!("A data informada em {field} é inválida.")
            }
            DocumentError::MedicationNotFound(id) => {
                format!("Medicamento {id} não encontrado.")
            }
            DocumentError::InvalidInput(reason) => format!("Dados inválidos: {reason}."),
            DocumentError::ProtocolNotFound(cid) => {
                format!("Nenhum protocolo cadastrado para o CID {cid}.")
            }
            _ => "Não foi possível gerar o documento.".to_owned(),
        }
    }
}

pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_follow_error_taxonomy() {
        assert_eq!(
            DocumentError::MissingField("data_1".into()).category(),
            ErrorCategory::Data
        );
        assert_eq!(
            DocumentError::MedicationNotFound("7".into()).category(),
            ErrorCategory::Data
        );
        assert_eq!(
            DocumentError::ProtocolTemplateMissing(PathBuf::from("/t/base.pdf")).category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            DocumentError::NoContentProduced.category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            DocumentError::ConcatenationFailed("x".into()).category(),
            ErrorCategory::Structural
        );
    }

    #[test]
    fn test_structural_errors_hide_internal_reason() {
        let err = DocumentError::ConcatenationFailed("pdftk exited with 1".into());
        assert!(!err.user_message().contains("pdftk"));
        assert!(err.to_string().contains("pdftk exited with 1"));
    }

    #[test]
    fn test_data_errors_name_the_field() {
        let err = DocumentError::MissingField("data_1".into());
        assert!(err.user_message().contains("data_1"));
    }
}

//! Response packaging: bytes, suggested filename and metadata.

use crate::assembler::FinalDocument;
use crate::constants::{
    DISEASE_CODE_FIELD, OUTPUT_FILENAME_EXTENSION, OUTPUT_FILENAME_PREFIX, PATIENT_ID_FIELD,
    PDF_CONTENT_TYPE,
};
use crate::{DocumentError, DocumentResult};
use chrono::{DateTime, Utc};
use lme_types::SubmissionData;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// The identifiers the output filename is built from.
///
/// Captured from the raw submission, before redaction can remove the patient identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentName {
    patient_id: String,
    disease_code: String,
}

impl DocumentName {
    pub fn new(patient_id: impl Into<String>, disease_code: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            disease_code: disease_code.into(),
        }
    }

    /// Reads `cpf_paciente` and `cid` from a submission.
    pub fn capture(data: &SubmissionData) -> DocumentResult<Self> {
        let required = |field: &str| {
            data.rendered(field)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DocumentError::MissingField(field.to_owned()))
        };
        Ok(Self::new(required(PATIENT_ID_FIELD)?, required(DISEASE_CODE_FIELD)?))
    }

    pub fn disease_code(&self) -> &str {
        &self.disease_code
    }

    /// `pdf_final_<patient id>_<disease code>.pdf`.
    ///
    /// Characters outside `[A-Za-z0-9.-]` are replaced with `-` so the name is safe in a
    /// header and on any filesystem.
    pub fn filename(&self) -> String {
        format!(
            "{}_{}_{}.{}",
            OUTPUT_FILENAME_PREFIX,
            sanitise(&self.patient_id),
            sanitise(&self.disease_code),
            OUTPUT_FILENAME_EXTENSION
        )
    }
}

fn sanitise(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub size_bytes: usize,
    /// Lowercase hex SHA-256 of the bytes.
    pub sha256: String,
    /// Media type detected from the content, if recognised.
    pub detected_media_type: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub fragments: usize,
}

/// The final document ready to hand to the caller.
#[derive(Debug, Clone)]
pub struct PackagedDocument {
    bytes: Vec<u8>,
    filename: String,
    metadata: DocumentMetadata,
}

impl PackagedDocument {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn content_type(&self) -> &'static str {
        PDF_CONTENT_TYPE
    }

    /// Value of the `Content-Disposition` header: shown inline, with the suggested name.
    pub fn content_disposition(&self) -> String {
        format!("inline; filename=\"{}\"", self.filename)
    }
}

pub fn package(document: FinalDocument, name: &DocumentName) -> PackagedDocument {
    let fragments = document.fragments();
    let bytes = document.into_bytes();

    let sha256 = hex::encode(Sha256::digest(&bytes));
    let detected_media_type = infer::get(&bytes).map(|kind| kind.mime_type().to_owned());
    let filename = name.filename();

    tracing::debug!(
        filename = %filename,
        size_bytes = bytes.len(),
        sha256 = %sha256,
        "document packaged"
    );

    PackagedDocument {
        metadata: DocumentMetadata {
            size_bytes: bytes.len(),
            sha256,
            detected_media_type,
            generated_at: Utc::now(),
            fragments,
        },
        filename,
        bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filler::ScratchFormFiller;
    use crate::selection::TemplateList;
    use crate::test_support::FakeTool;
    use crate::DocumentAssembler;
    use lme_scratch::ScratchArea;
    use lme_types::FormFields;
    use tempfile::TempDir;

    fn single_fragment_document() -> FinalDocument {
        let templates = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let base = templates.path().join("base.pdf");
        std::fs::write(&base, b"template").unwrap();
        let filler = ScratchFormFiller::new(
            FakeTool::default(),
            ScratchArea::new(scratch.path()).unwrap(),
        );
        let list: TemplateList = [base].into_iter().collect();

        DocumentAssembler::new(&filler)
            .assemble(&list, &FormFields::default())
            .unwrap()
    }

    #[test]
    fn test_capture_requires_identifiers() {
        let data: SubmissionData = [("cpf_paciente", "123.456.789-01"), ("cid", "G35")]
            .into_iter()
            .collect();
        let name = DocumentName::capture(&data).unwrap();
        assert_eq!(name.filename(), "pdf_final_123.456.789-01_G35.pdf");

        let data: SubmissionData = [("cpf_paciente", " "), ("cid", "G35")].into_iter().collect();
        assert!(matches!(
            DocumentName::capture(&data),
            Err(DocumentError::MissingField(field)) if field == "cpf_paciente"
        ));
    }

    #[test]
    fn test_filename_is_header_safe() {
        let name = DocumentName::new("12/34\"5", "G30 .1");
        assert_eq!(name.filename(), "pdf_final_12-34-5_G30-.1.pdf");
    }

    #[test]
    fn test_package_metadata() {
        let document = single_fragment_document();
        let expected_len = document.bytes().len();
        let packaged = package(document, &DocumentName::new("12345678901", "G35"));

        assert_eq!(packaged.filename(), "pdf_final_12345678901_G35.pdf");
        assert_eq!(packaged.metadata().size_bytes, expected_len);
        assert_eq!(packaged.metadata().sha256.len(), 64);
        assert_eq!(packaged.metadata().fragments, 1);
        assert_eq!(packaged.content_type(), "application/pdf");
        assert_eq!(
            packaged.content_disposition(),
            "inline; filename=\"pdf_final_12345678901_G35.pdf\""
        );
        assert_eq!(
            packaged.metadata().detected_media_type.as_deref(),
            Some("application/pdf")
        );
    }
}

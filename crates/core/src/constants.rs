//! Constants used throughout the LME core crate.
//!
//! Field names here are the names of the AcroForm fields in the LME templates. Renaming one
//! silently blanks that field in every generated document.

/// Start date of the treatment; every other date is derived from it.
pub const START_DATE_FIELD: &str = "data_1";

/// Number of monthly dates printed on the LME (the start date plus five derived ones).
pub const PRESCRIPTION_MONTHS: usize = 6;

/// Spacing, in days, between consecutive prescription dates.
pub const DAYS_BETWEEN_DATES: u64 = 30;

/// Who filled in the form: the clinician or someone else (patient, carer, clerk).
pub const FILLED_BY_FIELD: &str = "preenchido_por";

/// Value of [`FILLED_BY_FIELD`] meaning the clinician filled the form personally.
pub const FILLED_BY_CLINICIAN: &str = "medico";

/// Fields removed entirely when the form was not filled by the clinician.
pub const REDACTED_FIELDS: &[&str] = &[
    "cpf_paciente",
    "telefone1_paciente",
    "telefone2_paciente",
    "email_paciente",
];

/// Fields forced to empty when the form was not filled by the clinician.
pub const BLANKED_FIELDS: &[&str] = &["etnia", "escolha_documento"];

/// Patient identifier (CPF) used in the output filename.
pub const PATIENT_ID_FIELD: &str = "cpf_paciente";

/// Disease code (CID-10) used in the output filename and to resolve the protocol.
pub const DISEASE_CODE_FIELD: &str = "cid";

/// Maximum number of medications on one LME.
pub const MAX_MEDICATIONS: usize = 4;

/// Placeholder value of an unused medication slot.
pub const MEDICATION_PLACEHOLDER: &str = "nenhum";

/// Receives the consent medication's display name.
pub const CONSENT_MEDICATION_FIELD: &str = "consentimento_medicamento";

/// Administration route, recorded for the first medication only.
pub const FIRST_MEDICATION_ROUTE_FIELD: &str = "med1_via";

/// Flag: first prescription, so a consent annex is required.
pub const CONSENT_FLAG: &str = "consentimento";

/// Flag: include the medical report annex.
pub const REPORT_FLAG: &str = "relatorio";

/// Flag: include the exam request annex.
pub const EXAMS_FLAG: &str = "exames";

/// Prefix of protocol-specific (conditional) submission fields.
pub const CONDITIONAL_FIELD_PREFIX: &str = "opt_";

/// Consent template file name inside a protocol directory.
pub const CONSENT_TEMPLATE_FILENAME: &str = "consentimento.pdf";

/// Directory inside a protocol directory scanned by the legacy selection backend.
pub const LEGACY_BASE_PDFS_DIR: &str = "pdfs_base";

/// Leading bytes of every valid output document.
pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Prefix of the suggested output filename.
pub const OUTPUT_FILENAME_PREFIX: &str = "pdf_final";

/// Extension of the suggested output filename.
pub const OUTPUT_FILENAME_EXTENSION: &str = "pdf";

/// Content type of the final document.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Default pdftk executable name, resolved through `PATH`.
pub const DEFAULT_PDFTK_BIN: &str = "pdftk";

/// Extensions accepted for protocol configuration files.
pub const PROTOCOL_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

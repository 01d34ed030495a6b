//! # LME Core
//!
//! Document assembly for LME (Laudo de Solicitação de Medicamentos) prescriptions.
//!
//! A submission goes through these stages:
//!
//! - [`transform`]: dates, medication lines, consent name, privacy redaction
//! - [`selection`]: which templates, in which order, from the protocol configuration
//! - [`filler`]: fill each template through an external tool and scratch files
//! - [`assembler`]: drop failed fills and merge the rest
//! - [`packaging`]: bytes, filename and metadata for the caller
//!
//! [`DocumentService`] runs them end to end. Protocols, the medication catalogue and the
//! submission itself are supplied by the caller; the core owns no persistent state.
//!
//! ## Configuration
//!
//! [`CoreConfig`] is resolved once at startup by the binaries. Nothing in this crate reads
//! environment variables while handling a request.

pub mod assembler;
pub mod config;
pub mod constants;
pub mod error;
pub mod filler;
pub mod medication;
pub mod packaging;
pub mod prescription;
pub mod protocol;
pub mod selection;
pub mod service;
pub mod transform;

#[cfg(test)]
mod test_support;

pub use assembler::{DocumentAssembler, FinalDocument};
pub use config::{
    flag_from_env_value, resolve_scratch_dir, selection_backend_from_env_value, CoreConfig,
    SelectionBackend,
};
pub use error::{DocumentError, DocumentResult, ErrorCategory};
pub use filler::{FillOutcome, FormFiller, PdfTool, Pdftk, ScratchFormFiller};
pub use medication::{Medication, MedicationCatalogue, MedicationLookup};
pub use packaging::{package, DocumentMetadata, DocumentName, PackagedDocument};
pub use prescription::{MedicationPrescription, MonthlyDose, Prescription};
pub use protocol::{FieldDescriptor, FieldKind, MedicationAnnexes, Protocol, ProtocolConfig, ProtocolRegistry};
pub use selection::{
    selector_for, DeclarativeSelector, DirectoryGlobSelector, TemplateLayout, TemplateList,
    TemplateSelector,
};
pub use service::DocumentService;
pub use transform::{
    conditional_fields, renewal_submission, DataTransformer, MedicationSelection,
    SelectedMedication, TransformedSubmission,
};

//! The document generation pipeline as one service.

use crate::assembler::DocumentAssembler;
use crate::config::CoreConfig;
use crate::filler::{FormFiller, ScratchFormFiller};
use crate::medication::MedicationLookup;
use crate::packaging::{package, DocumentName, PackagedDocument};
use crate::protocol::Protocol;
use crate::selection::{selector_for, TemplateList, TemplateSelector};
use crate::transform::DataTransformer;
use crate::DocumentResult;
use lme_types::SubmissionData;
use std::sync::Arc;

/// Generates LME documents. Cheap to share between threads.
pub struct DocumentService {
    filler: Arc<dyn FormFiller>,
    selector: Box<dyn TemplateSelector>,
}

impl DocumentService {
    pub fn new(filler: Arc<dyn FormFiller>, selector: Box<dyn TemplateSelector>) -> Self {
        Self { filler, selector }
    }

    /// The production service: pdftk over the configured scratch directory.
    pub fn from_config(config: &CoreConfig) -> DocumentResult<Self> {
        let filler = ScratchFormFiller::from_config(config)?;
        Ok(Self::new(Arc::new(filler), selector_for(config)))
    }

    /// Runs the whole pipeline for one submission.
    ///
    /// The filename identifiers are read before the transformer can redact them.
    pub fn generate(
        &self,
        protocol: &Protocol,
        lookup: &dyn MedicationLookup,
        raw: SubmissionData,
    ) -> DocumentResult<PackagedDocument> {
        let span = tracing::info_span!("generate", protocol = %protocol.name);
        let _guard = span.enter();

        let name = DocumentName::capture(&raw)?;
        let (templates, transformed) = self.prepare(protocol, lookup, raw)?;

        let fields = transformed.to_form_fields();
        let document = DocumentAssembler::new(self.filler.as_ref()).assemble(&templates, &fields)?;

        Ok(package(document, &name))
    }

    /// Resolves the template list for a submission without filling anything.
    pub fn resolve_templates(
        &self,
        protocol: &Protocol,
        lookup: &dyn MedicationLookup,
        raw: SubmissionData,
    ) -> DocumentResult<TemplateList> {
        self.prepare(protocol, lookup, raw)
            .map(|(templates, _)| templates)
    }

    fn prepare(
        &self,
        protocol: &Protocol,
        lookup: &dyn MedicationLookup,
        raw: SubmissionData,
    ) -> DocumentResult<(TemplateList, SubmissionData)> {
        let transformed = DataTransformer::new(lookup)
            .with_protocol(&protocol.config)
            .transform(raw)?;
        let templates = self
            .selector
            .resolve(protocol, &transformed.data, &transformed.selection)?;

        tracing::debug!(
            templates = templates.len(),
            medications = transformed.selection.len(),
            "templates selected"
        );

        Ok((templates, transformed.data))
    }
}

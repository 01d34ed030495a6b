//! Document assembler: fill every selected template in order and merge the fragments.

use crate::filler::{FillOutcome, FormFiller};
use crate::selection::TemplateList;
use crate::{DocumentError, DocumentResult};
use lme_types::FormFields;

/// The merged document, before packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalDocument {
    bytes: Vec<u8>,
    fragments: usize,
    skipped: usize,
}

impl FinalDocument {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of templates that made it into the document.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Number of templates dropped because their fill failed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

pub struct DocumentAssembler<'a> {
    filler: &'a dyn FormFiller,
}

impl<'a> DocumentAssembler<'a> {
    pub fn new(filler: &'a dyn FormFiller) -> Self {
        Self { filler }
    }

    /// Fills `templates` in order and merges the results.
    ///
    /// Templates whose fill soft-fails are dropped. A single fragment is returned unchanged;
    /// two or more are concatenated.
    ///
    /// # Errors
    ///
    /// - `DocumentError::NoContentProduced` if no template could be filled
    /// - `DocumentError::ConcatenationFailed` if the merge fails
    pub fn assemble(&self, templates: &TemplateList, fields: &FormFields) -> DocumentResult<FinalDocument> {
        let mut fragments = Vec::with_capacity(templates.len());
        let mut skipped = 0usize;

        for template in templates.iter() {
            match self.filler.fill(template, fields)? {
                FillOutcome::Filled(bytes) => fragments.push(bytes),
                FillOutcome::Failed(_) => skipped += 1,
            }
        }

        let produced = fragments.len();
        let bytes = match produced {
            0 => return Err(DocumentError::NoContentProduced),
            1 => fragments.swap_remove(0),
            _ => self.filler.concat(&fragments)?,
        };

        tracing::info!(
            templates = templates.len(),
            fragments = produced,
            skipped,
            bytes = bytes.len(),
            "document assembled"
        );

        Ok(FinalDocument {
            bytes,
            fragments: produced,
            skipped,
        })
    }
}

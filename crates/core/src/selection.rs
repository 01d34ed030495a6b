//! Template selection: which templates go into a document, and in what order.
//!
//! Order is base, disease annexes, per-medication annexes (selection order), consent, report,
//! exams. It is the page order of the final document.
//!
//! Two backends implement [`TemplateSelector`]:
//!
//! - [`DeclarativeSelector`] reads the protocol's configuration
//! - [`DirectoryGlobSelector`] is the legacy layout, where every file in the protocol's
//!   `pdfs_base/` directory is an annex

use crate::config::{CoreConfig, SelectionBackend};
use crate::constants::{CONSENT_TEMPLATE_FILENAME, LEGACY_BASE_PDFS_DIR};
use crate::prescription::medication_id_field;
use crate::protocol::Protocol;
use crate::transform::{consent_requested, exams_requested, report_requested, MedicationSelection};
use crate::{DocumentError, DocumentResult};
use lme_types::SubmissionData;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Ordered templates to fill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TemplateList(Vec<PathBuf>);

impl TemplateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, template: PathBuf) {
        self.0.push(template);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PathBuf> for TemplateList {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub trait TemplateSelector: Send + Sync {
    /// Resolves the ordered template list for one submission.
    ///
    /// # Errors
    ///
    /// `DocumentError::ProtocolTemplateMissing` if the base template does not exist.
    /// `DocumentError::MissingField` if consent is requested with no medication selected.
    fn resolve(
        &self,
        protocol: &Protocol,
        data: &SubmissionData,
        selection: &MedicationSelection,
    ) -> DocumentResult<TemplateList>;
}

/// Builds the selector configured by `config`.
pub fn selector_for(config: &CoreConfig) -> Box<dyn TemplateSelector> {
    let layout = TemplateLayout::from_config(config);
    match config.selection_backend() {
        SelectionBackend::Declarative => Box::new(DeclarativeSelector::new(layout)),
        SelectionBackend::DirectoryGlob => {
            tracing::warn!("using deprecated directory-glob template selection");
            Box::new(DirectoryGlobSelector::new(layout))
        }
    }
}

/// Where templates live. Shared by both backends.
#[derive(Debug, Clone)]
pub struct TemplateLayout {
    template_root: PathBuf,
    base: PathBuf,
    report: Option<PathBuf>,
    exams: Option<PathBuf>,
}

impl TemplateLayout {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            template_root: config.template_root().to_path_buf(),
            base: config.base_template().to_path_buf(),
            report: config.report_template().map(Path::to_path_buf),
            exams: config.exams_template().map(Path::to_path_buf),
        }
    }

    fn protocol_dir(&self, protocol: &Protocol) -> PathBuf {
        self.template_root.join(protocol.name.as_str())
    }

    fn start(&self) -> DocumentResult<TemplateList> {
        if !self.base.is_file() {
            return Err(DocumentError::ProtocolTemplateMissing(self.base.clone()));
        }
        Ok(TemplateList(vec![self.base.clone()]))
    }

    /// Consent, report and exams annexes, each only when requested and present on disk.
    fn append_conditional(
        &self,
        list: &mut TemplateList,
        protocol: &Protocol,
        data: &SubmissionData,
        selection: &MedicationSelection,
    ) -> DocumentResult<()> {
        if consent_requested(data) {
            if selection.first_name().is_none() {
                return Err(DocumentError::MissingField(medication_id_field(1)));
            }
            let consent = self.protocol_dir(protocol).join(CONSENT_TEMPLATE_FILENAME);
            push_if_available(list, consent, "consent");
        }

        if report_requested(data) {
            match &self.report {
                Some(report) => push_if_available(list, report.clone(), "report"),
                None => tracing::warn!("report requested but no report template is configured"),
            }
        }

        if exams_requested(data) {
            match &self.exams {
                Some(exams) => push_if_available(list, exams.clone(), "exams"),
                None => tracing::warn!("exams requested but no exams template is configured"),
            }
        }

        Ok(())
    }
}

fn push_if_available(list: &mut TemplateList, template: PathBuf, kind: &'static str) {
    if template.is_file() {
        list.push(template);
    } else {
        tracing::warn!(
            template = %template.display(),
            kind,
            "optional template not available, skipping"
        );
    }
}

/// Selection driven by the protocol's declarative configuration.
#[derive(Debug, Clone)]
pub struct DeclarativeSelector {
    layout: TemplateLayout,
}

impl DeclarativeSelector {
    pub fn new(layout: TemplateLayout) -> Self {
        Self { layout }
    }
}

impl TemplateSelector for DeclarativeSelector {
    fn resolve(
        &self,
        protocol: &Protocol,
        data: &SubmissionData,
        selection: &MedicationSelection,
    ) -> DocumentResult<TemplateList> {
        let mut list = self.layout.start()?;
        let protocol_dir = self.layout.protocol_dir(protocol);

        for file in &protocol.config.disease_files {
            push_if_available(&mut list, protocol_dir.join(file), "disease");
        }

        for entry in selection.iter() {
            let name = &entry.medication.name;
            match protocol.config.medication_annexes(name) {
                Some((key, annexes)) => {
                    tracing::debug!(
                        slot = entry.slot,
                        key,
                        annexes = annexes.files.len(),
                        "medication matched protocol entry"
                    );
                    for file in &annexes.files {
                        push_if_available(&mut list, protocol_dir.join(file), "medication");
                    }
                }
                None => tracing::debug!(
                    slot = entry.slot,
                    protocol = %protocol.name,
                    "medication has no protocol annexes"
                ),
            }
        }

        self.layout
            .append_conditional(&mut list, protocol, data, selection)?;

        tracing::debug!(templates = list.len(), "templates resolved");
        Ok(list)
    }
}

/// Legacy selection: every file under `<protocol>/pdfs_base/`, in name order.
#[derive(Debug, Clone)]
pub struct DirectoryGlobSelector {
    layout: TemplateLayout,
}

impl DirectoryGlobSelector {
    pub fn new(layout: TemplateLayout) -> Self {
        Self { layout }
    }
}

impl TemplateSelector for DirectoryGlobSelector {
    fn resolve(
        &self,
        protocol: &Protocol,
        data: &SubmissionData,
        selection: &MedicationSelection,
    ) -> DocumentResult<TemplateList> {
        let mut list = self.layout.start()?;
        let annex_dir = self.layout.protocol_dir(protocol).join(LEGACY_BASE_PDFS_DIR);

        match std::fs::read_dir(&annex_dir) {
            Ok(entries) => {
                let mut files: Vec<PathBuf> = entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file())
                    .collect();
                files.sort();
                for file in files {
                    list.push(file);
                }
            }
            Err(e) => tracing::warn!(
                dir = %annex_dir.display(),
                error = %e,
                "protocol annex directory not readable"
            ),
        }

        self.layout
            .append_conditional(&mut list, protocol, data, selection)?;

        Ok(list)
    }
}

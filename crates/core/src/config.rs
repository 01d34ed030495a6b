//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into core services. Request
//! handling never reads environment variables, which keeps behaviour consistent across
//! threads and test harnesses.

use crate::constants::DEFAULT_PDFTK_BIN;
use crate::{DocumentError, DocumentResult};
use lme_scratch::MEMORY_BACKED_DIR;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which template selection backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionBackend {
    /// Templates come from the protocol's declarative configuration.
    #[default]
    Declarative,
    /// Legacy: every file in the protocol's `pdfs_base/` directory is an annex.
    DirectoryGlob,
}

impl FromStr for SelectionBackend {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "declarative" => Ok(SelectionBackend::Declarative),
            "directory-glob" | "directory_glob" | "legacy" => Ok(SelectionBackend::DirectoryGlob),
            other => Err(DocumentError::InvalidInput(format!(
                "unknown selection backend '{other}' (expected 'declarative' or 'directory-glob')"
            ))),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    template_root: PathBuf,
    base_template: PathBuf,
    report_template: Option<PathBuf>,
    exams_template: Option<PathBuf>,
    scratch_dir: PathBuf,
    selection_backend: SelectionBackend,
    pdftk_bin: PathBuf,
    flatten: bool,
    propagate_fill_failures: bool,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `template_root` holds one directory per protocol. A relative `base_template` is
    /// resolved against `template_root`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidInput` if `template_root` is not a directory.
    pub fn new(
        template_root: PathBuf,
        base_template: PathBuf,
        scratch_dir: PathBuf,
    ) -> DocumentResult<Self> {
        if !template_root.is_dir() {
            return Err(DocumentError::InvalidInput(format!(
                "template root is not a directory: {}",
                template_root.display()
            )));
        }

        let base_template = resolve_against(&template_root, base_template);

        Ok(Self {
            template_root,
            base_template,
            report_template: None,
            exams_template: None,
            scratch_dir,
            selection_backend: SelectionBackend::default(),
            pdftk_bin: PathBuf::from(DEFAULT_PDFTK_BIN),
            flatten: true,
            propagate_fill_failures: false,
        })
    }

    #[must_use]
    pub fn with_report_template(mut self, path: Option<PathBuf>) -> Self {
        self.report_template = path.map(|p| resolve_against(&self.template_root, p));
        self
    }

    #[must_use]
    pub fn with_exams_template(mut self, path: Option<PathBuf>) -> Self {
        self.exams_template = path.map(|p| resolve_against(&self.template_root, p));
        self
    }

    #[must_use]
    pub fn with_selection_backend(mut self, backend: SelectionBackend) -> Self {
        self.selection_backend = backend;
        self
    }

    #[must_use]
    pub fn with_pdftk_bin(mut self, bin: PathBuf) -> Self {
        self.pdftk_bin = bin;
        self
    }

    #[must_use]
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// When set, a failed template fill aborts the document instead of being skipped.
    #[must_use]
    pub fn with_propagate_fill_failures(mut self, propagate: bool) -> Self {
        self.propagate_fill_failures = propagate;
        self
    }

    pub fn template_root(&self) -> &Path {
        &self.template_root
    }

    pub fn base_template(&self) -> &Path {
        &self.base_template
    }

    pub fn report_template(&self) -> Option<&Path> {
        self.report_template.as_deref()
    }

    pub fn exams_template(&self) -> Option<&Path> {
        self.exams_template.as_deref()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn selection_backend(&self) -> SelectionBackend {
        self.selection_backend
    }

    pub fn pdftk_bin(&self) -> &Path {
        &self.pdftk_bin
    }

    pub fn flatten(&self) -> bool {
        self.flatten
    }

    pub fn propagate_fill_failures(&self) -> bool {
        self.propagate_fill_failures
    }
}

fn resolve_against(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

/// Resolve the scratch directory without reading environment variables.
///
/// If `override_dir` is provided it must be an existing directory. Otherwise the
/// memory-backed mount is used when present, falling back to the OS temp directory (which
/// may be disk-backed, hence the warning).
pub fn resolve_scratch_dir(override_dir: Option<PathBuf>) -> DocumentResult<PathBuf> {
    if let Some(dir) = override_dir {
        if dir.is_dir() {
            return Ok(dir);
        }
        return Err(DocumentError::InvalidInput(format!(
            "LME_SCRATCH_DIR override is not a directory: {}",
            dir.display()
        )));
    }

    let shm = PathBuf::from(MEMORY_BACKED_DIR);
    if shm.is_dir() {
        return Ok(shm);
    }

    let fallback = std::env::temp_dir();
    tracing::warn!(
        fallback = %fallback.display(),
        "{} not available, scratch files will use the temp directory",
        MEMORY_BACKED_DIR
    );
    Ok(fallback)
}

/// Parse the selection backend from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the declarative backend.
pub fn selection_backend_from_env_value(value: Option<String>) -> DocumentResult<SelectionBackend> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let parsed = value.map(|v| v.parse::<SelectionBackend>()).transpose()?;

    Ok(parsed.unwrap_or_default())
}

/// Parse an on/off switch from an optional string value, using `default` when unset.
pub fn flag_from_env_value(value: Option<String>, default: bool) -> DocumentResult<bool> {
    let Some(value) = value.map(|v| v.trim().to_ascii_lowercase()).filter(|v| !v.is_empty())
    else {
        return Ok(default);
    };

    match value.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DocumentError::InvalidInput(format!(
            "expected a boolean switch, got '{other}'"
        ))),
    }
}

/// Read and parse a YAML (or JSON) configuration file.
///
/// This uses `serde_path_to_error` to surface a best-effort "path" (e.g.
/// `medications.fingolimode.files`) in the error when the content does not match the
/// expected schema.
pub fn load_yaml_file<T: serde::de::DeserializeOwned>(path: &Path) -> DocumentResult<T> {
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_yaml(path, &text)
}

pub(crate) fn parse_yaml<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> DocumentResult<T> {
    let deserializer = serde_yaml::Deserializer::from_str(text);

    match serde_path_to_error::deserialize(deserializer) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let at = err.path().to_string();
            let at = if at.is_empty() || at == "." {
                "<root>".to_owned()
            } else {
                at
            };
            Err(DocumentError::ConfigParse {
                path: path.to_path_buf(),
                at,
                message: err.into_inner().to_string(),
            })
        }
    }
}

//! Disease protocols and their declarative annex configuration.
//!
//! A protocol file looks like:
//!
//! ```yaml
//! name: esclerose_multipla
//! disease_codes: [G35]
//! disease_files:
//!   - pdfs_base/edss_modelo.pdf
//! medications:
//!   fingolimode:
//!     files: [monitoramento_fingolimode_modelo.pdf]
//!     consent_name: fingolimode
//!   glatiramer:
//!     files: []
//!     consent_name: glatiramer
//! fields:
//!   - name: opt_edss
//!     label: EDSS
//!     type: choice
//!     initial: "0"
//!     choices: [["0", "0"], ["0,5", "0,5"]]
//! ```
//!
//! Template paths are relative to the protocol's directory under the template root.

use crate::config::load_yaml_file;
use crate::constants::PROTOCOL_FILE_EXTENSIONS;
use crate::{DocumentError, DocumentResult};
use lme_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Annexes attached to one medication within a protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationAnnexes {
    #[serde(default)]
    pub files: Vec<String>,
    /// Name printed on the consent annex, when it differs from the catalogue name.
    #[serde(default)]
    pub consent_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Choice,
    Boolean,
    Number,
    Text,
    Textarea,
    Date,
}

/// A protocol-specific form field. Only used by upstream form rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub initial: Option<serde_json::Value>,
    #[serde(default)]
    pub choices: Vec<(String, String)>,
    #[serde(default)]
    pub widget_class: Option<String>,
}

/// Declarative annex configuration of one protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Disease-specific annexes, in document order.
    #[serde(default)]
    pub disease_files: Vec<String>,
    /// Medication key to annexes. Keys are lowercase medication names or name fragments.
    #[serde(default)]
    pub medications: BTreeMap<String, MedicationAnnexes>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl ProtocolConfig {
    /// Finds the annex entry for a medication by its catalogue name.
    ///
    /// An entry whose key equals the lowercased name wins. Otherwise the first entry (in key
    /// order) whose key occurs inside the lowercased name matches, so `fingolimode` matches
    /// `Fingolimode 0,5 mg`.
    pub fn medication_annexes(&self, medication_name: &str) -> Option<(&str, &MedicationAnnexes)> {
        let name = medication_name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }

        if let Some((key, annexes)) = self.medications.get_key_value(&name) {
            return Some((key.as_str(), annexes));
        }

        self.medications
            .iter()
            .find(|(key, _)| !key.is_empty() && name.contains(key.as_str()))
            .map(|(key, annexes)| (key.as_str(), annexes))
    }
}

/// A resolved protocol: its name (also its template directory) and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProtocolFile")]
pub struct Protocol {
    pub name: NonEmptyText,
    /// CID-10 codes treated under this protocol.
    pub disease_codes: Vec<String>,
    #[serde(flatten)]
    pub config: ProtocolConfig,
}

/// On-disk shape of a protocol file.
#[derive(Deserialize)]
struct ProtocolFile {
    name: NonEmptyText,
    #[serde(default)]
    disease_codes: Vec<String>,
    #[serde(default)]
    disease_files: Vec<String>,
    #[serde(default)]
    medications: BTreeMap<String, MedicationAnnexes>,
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
}

impl From<ProtocolFile> for Protocol {
    fn from(file: ProtocolFile) -> Self {
        Self {
            name: file.name,
            disease_codes: file.disease_codes,
            config: ProtocolConfig {
                disease_files: file.disease_files,
                medications: file.medications,
                fields: file.fields,
            },
        }
    }
}

impl Protocol {
    pub fn new(name: NonEmptyText, config: ProtocolConfig) -> Self {
        Self {
            name,
            disease_codes: Vec::new(),
            config,
        }
    }

    /// Load a protocol from a YAML or JSON file.
    pub fn load(path: &Path) -> DocumentResult<Self> {
        load_yaml_file(path)
    }
}

/// All known protocols, indexed by disease code.
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    by_code: BTreeMap<String, Arc<Protocol>>,
}

impl ProtocolRegistry {
    /// Builds a registry from already-loaded protocols.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidInput` if two protocols claim the same disease code.
    pub fn from_protocols(protocols: impl IntoIterator<Item = Protocol>) -> DocumentResult<Self> {
        let mut by_code: BTreeMap<String, Arc<Protocol>> = BTreeMap::new();

        for protocol in protocols {
            let protocol = Arc::new(protocol);
            for code in &protocol.disease_codes {
                let code = normalise_code(code);
                if let Some(existing) = by_code.get(&code) {
                    return Err(DocumentError::InvalidInput(format!(
                        "disease code {code} claimed by both {} and {}",
                        existing.name, protocol.name
                    )));
                }
                by_code.insert(code, Arc::clone(&protocol));
            }
        }

        Ok(Self { by_code })
    }

    /// Loads every `*.yaml`, `*.yml` and `*.json` file in `dir` (non-recursive).
    pub fn load_dir(dir: &Path) -> DocumentResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|source| DocumentError::ConfigRead {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DocumentError::ConfigRead {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let is_protocol_file = path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PROTOCOL_FILE_EXTENSIONS.contains(&e));
            if is_protocol_file {
                paths.push(path);
            }
        }
        paths.sort();

        let protocols = paths
            .iter()
            .map(|path| Protocol::load(path))
            .collect::<DocumentResult<Vec<_>>>()?;

        tracing::info!(
            dir = %dir.display(),
            protocols = protocols.len(),
            "loaded protocol configuration"
        );

        Self::from_protocols(protocols)
    }

    pub fn get(&self, disease_code: &str) -> Option<&Protocol> {
        self.by_code
            .get(&normalise_code(disease_code))
            .map(|p| p.as_ref())
    }

    /// Like [`Self::get`] but reports an unknown code as an error.
    pub fn resolve(&self, disease_code: &str) -> DocumentResult<&Protocol> {
        self.get(disease_code)
            .ok_or_else(|| DocumentError::ProtocolNotFound(disease_code.to_owned()))
    }

    pub fn disease_codes(&self) -> impl Iterator<Item = &str> {
        self.by_code.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

fn normalise_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

//! Medication lookup.
//!
//! The medication catalogue belongs to the surrounding system. The core only needs to turn an
//! identifier into a name, dosage and presentation, so it depends on [`MedicationLookup`] and
//! ships a file-backed [`MedicationCatalogue`] for the binaries and tests.

use crate::config::load_yaml_file;
use crate::{DocumentError, DocumentResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    /// Catalogue identifier. Unquoted numbers in the catalogue file are read as text.
    #[serde(deserialize_with = "id_from_scalar")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub presentation: String,
}

fn id_from_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

impl Medication {
    /// The medication line printed on the LME: `<name> <dosage> (<presentation>)`.
    pub fn description(&self) -> String {
        format!("{} {} ({})", self.name, self.dosage, self.presentation)
    }
}

/// Resolves a medication identifier.
pub trait MedicationLookup: Send + Sync {
    fn medication(&self, id: &str) -> Option<Medication>;

    /// Like [`MedicationLookup::medication`] but an unknown id is an error.
    fn require(&self, id: &str) -> DocumentResult<Medication> {
        self.medication(id)
            .ok_or_else(|| DocumentError::MedicationNotFound(id.to_owned()))
    }
}

/// In-memory catalogue keyed by medication id.
#[derive(Debug, Clone, Default)]
pub struct MedicationCatalogue {
    by_id: BTreeMap<String, Medication>,
}

impl MedicationCatalogue {
    pub fn new(medications: impl IntoIterator<Item = Medication>) -> Self {
        Self {
            by_id: medications
                .into_iter()
                .map(|m| (m.id.trim().to_owned(), m))
                .collect(),
        }
    }

    /// Loads a YAML or JSON list of medications.
    pub fn load(path: &Path) -> DocumentResult<Self> {
        let medications: Vec<Medication> = load_yaml_file(path)?;
        tracing::info!(
            path = %path.display(),
            medications = medications.len(),
            "loaded medication catalogue"
        );
        Ok(Self::new(medications))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl MedicationLookup for MedicationCatalogue {
    fn medication(&self, id: &str) -> Option<Medication> {
        self.by_id.get(id.trim()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fingolimode() -> Medication {
        Medication {
            id: "12".into(),
            name: "Fingolimode".into(),
            dosage: "0,5 mg".into(),
            presentation: "cápsula".into(),
        }
    }

    #[test]
    fn test_description_format() {
        assert_eq!(fingolimode().description(), "Fingolimode 0,5 mg (cápsula)");
    }

    #[test]
    fn test_require_unknown_id() {
        let catalogue = MedicationCatalogue::new([fingolimode()]);

        assert_eq!(catalogue.require(" 12 ").unwrap().name, "Fingolimode");
        assert!(matches!(
            catalogue.require("99"),
            Err(DocumentError::MedicationNotFound(id)) if id == "99"
        ));
    }

    #[test]
    fn test_load_yaml_list() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("medicamentos.yaml");
        fs::write(
            &path,
            "- id: '12'\n  name: Fingolimode\n  dosage: 0,5 mg\n  presentation: cápsula\n\
             - id: '13'\n  name: Glatiramer\n",
        )
        .unwrap();

        let catalogue = MedicationCatalogue::load(&path).unwrap();

        assert_eq!(catalogue.len(), 2);
        assert_eq!(catalogue.medication("13").unwrap().dosage, "");
    }

    #[test]
    fn test_load_accepts_numeric_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("medicamentos.yaml");
        fs::write(&path, "- id: 7\n  name: Natalizumabe\n- id: '08'\n  name: Teriflunomida\n")
            .unwrap();

        let catalogue = MedicationCatalogue::load(&path).unwrap();

        assert_eq!(catalogue.require("7").unwrap().name, "Natalizumabe");
        assert_eq!(catalogue.require("08").unwrap().name, "Teriflunomida");
    }

    #[test]
    fn test_load_reports_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = MedicationCatalogue::load(&temp.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, DocumentError::ConfigRead { .. }));
    }
}

//! Structured prescription, as persisted, and its flat form-field representation.
//!
//! Flat field names per medication slot `n` (1-based) and month `m` (1..=6):
//! `id_med{n}`, `med{n}_posologia_mes{m}`, `qtd_med{n}_mes{m}`, plus `med1_via` for slot 1.

use crate::constants::{
    FIRST_MEDICATION_ROUTE_FIELD, MAX_MEDICATIONS, MEDICATION_PLACEHOLDER, PRESCRIPTION_MONTHS,
};
use crate::{DocumentError, DocumentResult};
use lme_types::SubmissionData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyDose {
    pub dosage: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationPrescription {
    pub medication_id: String,
    pub months: [MonthlyDose; PRESCRIPTION_MONTHS],
    /// Administration route. Only recorded for slot 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Prescription keyed by medication slot number (1..=4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prescription(BTreeMap<u8, MedicationPrescription>);

pub fn medication_id_field(slot: u8) -> String {
    format!("id_med{slot}")
}

fn dosage_field(slot: u8, month: usize) -> String {
    format!("med{slot}_posologia_mes{month}")
}

fn quantity_field(slot: u8, month: usize) -> String {
    format!("qtd_med{slot}_mes{month}")
}

impl Prescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the medication in `slot`.
    ///
    /// # Errors
    ///
    /// `DocumentError::InvalidInput` if the slot is out of range or a route is given for a
    /// slot other than 1.
    pub fn insert(&mut self, slot: u8, medication: MedicationPrescription) -> DocumentResult<()> {
        if slot == 0 || usize::from(slot) > MAX_MEDICATIONS {
            return Err(DocumentError::InvalidInput(format!(
                "medication slot {slot} outside 1..={MAX_MEDICATIONS}"
            )));
        }
        if slot != 1 && medication.route.is_some() {
            return Err(DocumentError::InvalidInput(format!(
                "administration route is only recorded for slot 1, not {slot}"
            )));
        }
        self.0.insert(slot, medication);
        Ok(())
    }

    pub fn get(&self, slot: u8) -> Option<&MedicationPrescription> {
        self.0.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn slots(&self) -> impl Iterator<Item = (u8, &MedicationPrescription)> {
        self.0.iter().map(|(slot, med)| (*slot, med))
    }

    /// Writes every slot into `data` as flat form fields.
    pub fn flatten_into(&self, data: &mut SubmissionData) {
        for (slot, med) in self.slots() {
            data.insert(medication_id_field(slot), med.medication_id.as_str());
            for (i, dose) in med.months.iter().enumerate() {
                let month = i + 1;
                data.insert(dosage_field(slot, month), dose.dosage.as_str());
                data.insert(quantity_field(slot, month), dose.quantity.as_str());
            }
            if slot == 1 {
                if let Some(route) = &med.route {
                    data.insert(FIRST_MEDICATION_ROUTE_FIELD, route.as_str());
                }
            }
        }
    }

    /// Rebuilds the structure from flat form fields.
    ///
    /// Every slot `id_med1..id_med4` is read; absent and placeholder slots are skipped, so a
    /// prescription with gaps between slots flattens and restructures to itself. Missing
    /// monthly values are read as empty strings.
    pub fn from_fields(data: &SubmissionData) -> Self {
        let mut slots = BTreeMap::new();

        for slot in 1..=MAX_MEDICATIONS as u8 {
            let Some(id) = data.rendered(&medication_id_field(slot)) else {
                continue;
            };
            if id == MEDICATION_PLACEHOLDER {
                continue;
            }

            let months = std::array::from_fn(|i| MonthlyDose {
                dosage: data.rendered(&dosage_field(slot, i + 1)).unwrap_or_default(),
                quantity: data.rendered(&quantity_field(slot, i + 1)).unwrap_or_default(),
            });
            let route = if slot == 1 {
                data.rendered(FIRST_MEDICATION_ROUTE_FIELD)
            } else {
                None
            };

            slots.insert(
                slot,
                MedicationPrescription {
                    medication_id: id,
                    months,
                    route,
                },
            );
        }

        Self(slots)
    }
}

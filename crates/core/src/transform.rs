//! Data transformer: turns a raw submission into the exact field map the templates expect.
//!
//! The individual steps are public so callers (and tests) can apply them on their own; the
//! full pipeline is [`DataTransformer::transform`].

use crate::constants::{
    BLANKED_FIELDS, CONDITIONAL_FIELD_PREFIX, CONSENT_FLAG, CONSENT_MEDICATION_FIELD,
    DAYS_BETWEEN_DATES, EXAMS_FLAG, FILLED_BY_CLINICIAN, FILLED_BY_FIELD, MAX_MEDICATIONS,
    MEDICATION_PLACEHOLDER, PRESCRIPTION_MONTHS, REDACTED_FIELDS, REPORT_FLAG, START_DATE_FIELD,
};
use crate::medication::{Medication, MedicationLookup};
use crate::prescription::{medication_id_field, Prescription};
use crate::protocol::ProtocolConfig;
use crate::{DocumentError, DocumentResult};
use chrono::{Days, NaiveDate};
use lme_types::{FieldValue, SubmissionData, FORM_DATE_FORMAT};

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

fn date_field(month: usize) -> String {
    format!("data_{month}")
}

/// Reads the start date and writes `data_2..data_6` at 30-day steps from it.
///
/// Every step is computed from the original start date, and `data_1` itself is rewritten
/// as `DD/MM/YYYY` last.
pub fn derive_prescription_dates(data: &mut SubmissionData) -> DocumentResult<()> {
    let start = parse_start_date(data.get(START_DATE_FIELD))?;

    for month in 2..=PRESCRIPTION_MONTHS {
        let offset = DAYS_BETWEEN_DATES * (month as u64 - 1);
        let date = start
            .checked_add_days(Days::new(offset))
            .ok_or_else(|| DocumentError::InvalidDate {
                field: START_DATE_FIELD.to_owned(),
                value: start.to_string(),
            })?;
        data.insert(date_field(month), date.format(FORM_DATE_FORMAT).to_string());
    }
    data.insert(START_DATE_FIELD, start.format(FORM_DATE_FORMAT).to_string());

    Ok(())
}

fn parse_start_date(value: Option<&FieldValue>) -> DocumentResult<NaiveDate> {
    let missing = || DocumentError::MissingField(START_DATE_FIELD.to_owned());

    match value {
        None => Err(missing()),
        Some(FieldValue::Date(date)) => Ok(*date),
        Some(FieldValue::Text(text)) if text.trim().is_empty() => Err(missing()),
        Some(FieldValue::Text(text)) => {
            let text = text.trim();
            NaiveDate::parse_from_str(text, FORM_DATE_FORMAT)
                .or_else(|_| NaiveDate::parse_from_str(text, ISO_DATE_FORMAT))
                .map_err(|_| DocumentError::InvalidDate {
                    field: START_DATE_FIELD.to_owned(),
                    value: text.to_owned(),
                })
        }
        Some(other) => Err(DocumentError::InvalidDate {
            field: START_DATE_FIELD.to_owned(),
            value: other.render(),
        }),
    }
}

/// Strips patient contact data when someone other than the clinician filled the form.
///
/// Idempotent. An absent filled-by field counts as "not the clinician".
pub fn redact_for_third_party(data: &mut SubmissionData) {
    let filled_by_clinician = data
        .get(FILLED_BY_FIELD)
        .and_then(FieldValue::as_text)
        .is_some_and(|v| v == FILLED_BY_CLINICIAN);
    if filled_by_clinician {
        return;
    }

    for field in REDACTED_FIELDS {
        data.remove(field);
    }
    for field in BLANKED_FIELDS {
        data.insert(*field, "");
    }
}

/// Selected medication ids with their slot number, in slot order.
fn selected_slots(data: &SubmissionData) -> Vec<(u8, String)> {
    let mut slots = Vec::new();
    for slot in 1..=MAX_MEDICATIONS as u8 {
        let Some(id) = data.rendered(&medication_id_field(slot)) else {
            break;
        };
        let id = id.trim().to_owned();
        if id.is_empty() || id == MEDICATION_PLACEHOLDER {
            continue;
        }
        slots.push((slot, id));
    }
    slots
}

/// Ids in `id_med1..id_med4`, skipping the placeholder and stopping at the first absent key.
pub fn medication_ids(data: &SubmissionData) -> Vec<String> {
    selected_slots(data).into_iter().map(|(_, id)| id).collect()
}

/// True for a boolean `true` or the exact string `"True"`.
pub fn consent_requested(data: &SubmissionData) -> bool {
    match data.get(CONSENT_FLAG) {
        Some(FieldValue::Bool(flag)) => *flag,
        Some(FieldValue::Text(text)) => text == "True",
        _ => false,
    }
}

/// True when `key` is present and, once trimmed, non-empty and not (case-insensitively)
/// `"false"`.
pub fn flag_is_truthy(data: &SubmissionData, key: &str) -> bool {
    match data.get(key) {
        None => false,
        Some(FieldValue::Bool(flag)) => *flag,
        Some(FieldValue::Date(_)) => true,
        Some(FieldValue::Text(text)) => {
            let text = text.trim();
            !text.is_empty() && !text.eq_ignore_ascii_case("false")
        }
    }
}

pub fn report_requested(data: &SubmissionData) -> bool {
    flag_is_truthy(data, REPORT_FLAG)
}

pub fn exams_requested(data: &SubmissionData) -> bool {
    flag_is_truthy(data, EXAMS_FLAG)
}

/// Protocol-specific (`opt_*`) values of a submission.
pub fn conditional_fields(data: &SubmissionData) -> SubmissionData {
    data.iter()
        .filter(|(key, _)| key.starts_with(CONDITIONAL_FIELD_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// One resolved medication and the slot it was selected in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMedication {
    pub slot: u8,
    pub medication: Medication,
}

/// The medications selected on a submission, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedicationSelection {
    entries: Vec<SelectedMedication>,
}

impl MedicationSelection {
    /// Resolves every selected id through `lookup`.
    ///
    /// # Errors
    ///
    /// `DocumentError::MedicationNotFound` for the first id that does not resolve.
    pub fn resolve(data: &SubmissionData, lookup: &dyn MedicationLookup) -> DocumentResult<Self> {
        let entries = selected_slots(data)
            .into_iter()
            .map(|(slot, id)| {
                lookup
                    .require(&id)
                    .map(|medication| SelectedMedication { slot, medication })
            })
            .collect::<DocumentResult<Vec<_>>>()?;

        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<SelectedMedication>) -> Self {
        Self { entries }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.medication.id.as_str())
            .collect()
    }

    pub fn first(&self) -> Option<&Medication> {
        self.entries.first().map(|e| &e.medication)
    }

    /// Canonical name of the first medication, used on the consent annex.
    pub fn first_name(&self) -> Option<&str> {
        self.first().map(|m| m.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedMedication> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes `med<n>` = `<name> <dosage> (<presentation>)` for each selected slot.
pub fn describe_medications(data: &mut SubmissionData, selection: &MedicationSelection) {
    for entry in selection.iter() {
        data.insert(format!("med{}", entry.slot), entry.medication.description());
    }
}

/// Sets the consent medication name from the first selected medication.
///
/// The protocol entry's `consent_name` wins when the medication matches one that declares
/// it; otherwise the catalogue name is used.
///
/// # Errors
///
/// `DocumentError::MissingField` when nothing is selected, since the consent annex would
/// name no drug.
pub fn resolve_consent_medication(
    data: &mut SubmissionData,
    selection: &MedicationSelection,
    protocol: Option<&ProtocolConfig>,
) -> DocumentResult<()> {
    let first = selection
        .first()
        .ok_or_else(|| DocumentError::MissingField(medication_id_field(1)))?;
    let name = protocol
        .and_then(|config| config.medication_annexes(&first.name))
        .and_then(|(_, annexes)| annexes.consent_name.as_deref())
        .unwrap_or(&first.name);
    data.insert(CONSENT_MEDICATION_FIELD, name);
    Ok(())
}

/// Builds a renewal submission from a previous one.
///
/// The previous patient data is kept, the stored prescription is flattened back in, the
/// start date replaced and the consent/report/exams flags cleared.
pub fn renewal_submission(
    previous: &SubmissionData,
    prescription: &Prescription,
    new_start_date: NaiveDate,
) -> SubmissionData {
    let mut data = previous.clone();
    for month in 2..=PRESCRIPTION_MONTHS {
        data.remove(&date_field(month));
    }
    prescription.flatten_into(&mut data);
    data.insert(START_DATE_FIELD, new_start_date);
    data.insert(CONSENT_FLAG, false);
    data.insert(REPORT_FLAG, false);
    data.insert(EXAMS_FLAG, false);
    data
}

/// A submission after transformation, with the medications it selected.
#[derive(Debug, Clone)]
pub struct TransformedSubmission {
    pub data: SubmissionData,
    pub selection: MedicationSelection,
}

/// Runs the full transformation against a medication lookup.
pub struct DataTransformer<'a> {
    lookup: &'a dyn MedicationLookup,
    protocol: Option<&'a ProtocolConfig>,
}

impl<'a> DataTransformer<'a> {
    pub fn new(lookup: &'a dyn MedicationLookup) -> Self {
        Self {
            lookup,
            protocol: None,
        }
    }

    /// Uses the protocol's consent display names.
    #[must_use]
    pub fn with_protocol(mut self, protocol: &'a ProtocolConfig) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Dates, medication lines, consent name, then redaction.
    pub fn transform(&self, raw: SubmissionData) -> DocumentResult<TransformedSubmission> {
        let mut data = raw;

        derive_prescription_dates(&mut data)?;

        let selection = MedicationSelection::resolve(&data, self.lookup)?;
        describe_medications(&mut data, &selection);

        if consent_requested(&data) {
            resolve_consent_medication(&mut data, &selection, self.protocol)?;
        }

        redact_for_third_party(&mut data);

        tracing::debug!(
            fields = data.len(),
            medications = selection.len(),
            "submission transformed"
        );

        Ok(TransformedSubmission { data, selection })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medication::MedicationCatalogue;
    use crate::prescription::{MedicationPrescription, MonthlyDose};
    use crate::protocol::MedicationAnnexes;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn catalogue() -> MedicationCatalogue {
        MedicationCatalogue::new([
            Medication {
                id: "1".into(),
                name: "X-brand".into(),
                dosage: "10 mg".into(),
                presentation: "comprimido".into(),
            },
            Medication {
                id: "2".into(),
                name: "Glatiramer".into(),
                dosage: "40 mg/ml".into(),
                presentation: "seringa".into(),
            },
        ])
    }

    #[test]
    fn test_dates_step_from_original_start() {
        let start = date(2024, 1, 31);
        let mut data: SubmissionData = [(START_DATE_FIELD, FieldValue::Date(start))]
            .into_iter()
            .collect();

        derive_prescription_dates(&mut data).unwrap();

        for month in 2..=6usize {
            let expected = start + chrono::Duration::days(30 * (month as i64 - 1));
            assert_eq!(
                data.rendered(&format!("data_{month}")).unwrap(),
                expected.format("%d/%m/%Y").to_string()
            );
        }
        assert_eq!(data.get("data_1"), Some(&FieldValue::from("31/01/2024")));
        assert_eq!(data.rendered("data_2").as_deref(), Some("01/03/2024"));
    }

    #[test]
    fn test_dates_accept_form_and_iso_text() {
        let mut data: SubmissionData = [("data_1", "05/02/2024")].into_iter().collect();
        derive_prescription_dates(&mut data).unwrap();
        assert_eq!(data.rendered("data_6").as_deref(), Some("04/07/2024"));

        let mut data: SubmissionData = [("data_1", "2024-02-05")].into_iter().collect();
        derive_prescription_dates(&mut data).unwrap();
        assert_eq!(data.rendered("data_1").as_deref(), Some("05/02/2024"));
    }

    #[test]
    fn test_dates_missing_or_invalid() {
        let mut empty = SubmissionData::new();
        assert!(matches!(
            derive_prescription_dates(&mut empty),
            Err(DocumentError::MissingField(field)) if field == "data_1"
        ));

        let mut bad: SubmissionData = [("data_1", "31/02/2024")].into_iter().collect();
        assert!(matches!(
            derive_prescription_dates(&mut bad),
            Err(DocumentError::InvalidDate { .. })
        ));
        assert!(!bad.contains_key("data_2"));
    }

    #[test]
    fn test_dates_past_calendar_end_are_invalid() {
        let late = NaiveDate::MAX - chrono::Duration::days(40);
        let mut data: SubmissionData = [("data_1", FieldValue::Date(late))].into_iter().collect();

        assert!(matches!(
            derive_prescription_dates(&mut data),
            Err(DocumentError::InvalidDate { field, .. }) if field == "data_1"
        ));
    }

    fn patient_data(filled_by: &str) -> SubmissionData {
        [
            ("preenchido_por", filled_by),
            ("cpf_paciente", "12345678901"),
            ("telefone1_paciente", "11 9999-0000"),
            ("telefone2_paciente", "11 9999-0001"),
            ("email_paciente", "p@example.org"),
            ("etnia", "parda"),
            ("escolha_documento", "rg"),
            ("nome_paciente", "Maria"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_redaction_removes_and_blanks() {
        let mut data = patient_data("paciente");
        redact_for_third_party(&mut data);

        for field in REDACTED_FIELDS {
            assert!(!data.contains_key(field), "{field} should be removed");
        }
        assert_eq!(data.rendered("etnia").as_deref(), Some(""));
        assert_eq!(data.rendered("escolha_documento").as_deref(), Some(""));
        assert_eq!(data.rendered("nome_paciente").as_deref(), Some("Maria"));

        let once = data.clone();
        redact_for_third_party(&mut data);
        assert_eq!(data, once);
    }

    #[test]
    fn test_redaction_leaves_clinician_data_untouched() {
        let mut data = patient_data("medico");
        let before = data.clone();
        redact_for_third_party(&mut data);
        assert_eq!(data, before);
    }

    #[test]
    fn test_medication_ids_skip_placeholder_and_stop_at_gap() {
        let data: SubmissionData = [
            ("id_med1", "7"),
            ("id_med2", "nenhum"),
            ("id_med3", "9"),
            ("id_med5", "11"),
        ]
        .into_iter()
        .collect();

        assert_eq!(medication_ids(&data), vec!["7", "9"]);
        assert!(medication_ids(&SubmissionData::new()).is_empty());
    }

    #[test]
    fn test_flag_semantics() {
        let data: SubmissionData = [
            ("consentimento", FieldValue::from("true")),
            ("relatorio", FieldValue::from("FALSE")),
            ("exames", FieldValue::from("sim")),
        ]
        .into_iter()
        .collect();

        assert!(!consent_requested(&data));
        assert!(!report_requested(&data));
        assert!(exams_requested(&data));

        let data: SubmissionData = [
            ("consentimento", FieldValue::from("True")),
            ("relatorio", FieldValue::from(true)),
            ("exames", FieldValue::from("")),
        ]
        .into_iter()
        .collect();

        assert!(consent_requested(&data));
        assert!(report_requested(&data));
        assert!(!exams_requested(&data));
    }

    #[test]
    fn test_flags_are_trimmed() {
        let data: SubmissionData = [("relatorio", " false "), ("exames", "   ")]
            .into_iter()
            .collect();
        assert!(!report_requested(&data));
        assert!(!exams_requested(&data));

        let data: SubmissionData = [("relatorio", " True ")].into_iter().collect();
        assert!(report_requested(&data));
    }

    #[test]
    fn test_transform_full_pipeline() {
        let lookup = catalogue();
        let raw: SubmissionData = [
            ("data_1", FieldValue::from("01/03/2024")),
            ("id_med1", FieldValue::from("1")),
            ("id_med2", FieldValue::from("2")),
            ("consentimento", FieldValue::from(true)),
            ("preenchido_por", FieldValue::from("paciente")),
            ("cpf_paciente", FieldValue::from("12345678901")),
        ]
        .into_iter()
        .collect();

        let out = DataTransformer::new(&lookup).transform(raw).unwrap();

        assert_eq!(out.selection.ids(), vec!["1", "2"]);
        assert_eq!(out.selection.first_name(), Some("X-brand"));
        assert_eq!(
            out.data.rendered("consentimento_medicamento").as_deref(),
            Some("X-brand")
        );
        assert_eq!(
            out.data.rendered("med2").as_deref(),
            Some("Glatiramer 40 mg/ml (seringa)")
        );
        assert_eq!(out.data.rendered("data_2").as_deref(), Some("31/03/2024"));
        assert!(!out.data.contains_key("cpf_paciente"));
    }

    #[test]
    fn test_transform_unknown_medication_is_fatal() {
        let lookup = catalogue();
        let raw: SubmissionData = [
            ("data_1", "01/03/2024"),
            ("id_med1", "404"),
            ("consentimento", "True"),
        ]
        .into_iter()
        .collect();

        assert!(matches!(
            DataTransformer::new(&lookup).transform(raw),
            Err(DocumentError::MedicationNotFound(id)) if id == "404"
        ));
    }

    #[test]
    fn test_consent_without_medication() {
        let lookup = catalogue();
        let raw: SubmissionData = [("data_1", "01/03/2024"), ("consentimento", "True")]
            .into_iter()
            .collect();

        assert!(matches!(
            DataTransformer::new(&lookup).transform(raw),
            Err(DocumentError::MissingField(field)) if field == "id_med1"
        ));
    }

    #[test]
    fn test_consent_name_from_protocol_entry() {
        let lookup = catalogue();
        let mut protocol = ProtocolConfig::default();
        protocol.medications.insert(
            "glatiramer".into(),
            MedicationAnnexes {
                files: Vec::new(),
                consent_name: Some("acetato de glatirâmer".into()),
            },
        );
        let raw: SubmissionData = [
            ("data_1", FieldValue::from("01/03/2024")),
            ("id_med1", FieldValue::from("2")),
            ("consentimento", FieldValue::from(true)),
        ]
        .into_iter()
        .collect();

        let out = DataTransformer::new(&lookup)
            .with_protocol(&protocol)
            .transform(raw.clone())
            .unwrap();
        assert_eq!(
            out.data.rendered("consentimento_medicamento").as_deref(),
            Some("acetato de glatirâmer")
        );

        // Without a declared consent name the catalogue name is used.
        protocol.medications.clear();
        let out = DataTransformer::new(&lookup)
            .with_protocol(&protocol)
            .transform(raw)
            .unwrap();
        assert_eq!(
            out.data.rendered("consentimento_medicamento").as_deref(),
            Some("Glatiramer")
        );
    }

    #[test]
    fn test_conditional_fields() {
        let data: SubmissionData = [("opt_edss", "3,5"), ("nome_paciente", "Maria")]
            .into_iter()
            .collect();
        let optional = conditional_fields(&data);
        assert_eq!(optional.len(), 1);
        assert!(optional.contains_key("opt_edss"));
    }

    #[test]
    fn test_renewal_submission() {
        let previous: SubmissionData = [
            ("nome_paciente", FieldValue::from("Maria")),
            ("data_1", FieldValue::from("01/01/2024")),
            ("data_4", FieldValue::from("31/03/2024")),
            ("consentimento", FieldValue::from(true)),
            ("relatorio", FieldValue::from("True")),
        ]
        .into_iter()
        .collect();
        let mut prescription = Prescription::new();
        prescription
            .insert(
                1,
                MedicationPrescription {
                    medication_id: "1".into(),
                    months: std::array::from_fn(|_| MonthlyDose {
                        dosage: "1 cp".into(),
                        quantity: "30".into(),
                    }),
                    route: Some("oral".into()),
                },
            )
            .unwrap();

        let renewed = renewal_submission(&previous, &prescription, date(2024, 7, 1));

        assert_eq!(renewed.get("data_1"), Some(&FieldValue::Date(date(2024, 7, 1))));
        assert!(!renewed.contains_key("data_4"));
        assert!(!consent_requested(&renewed));
        assert!(!report_requested(&renewed));
        assert_eq!(renewed.rendered("id_med1").as_deref(), Some("1"));
        assert_eq!(renewed.rendered("med1_via").as_deref(), Some("oral"));
        assert_eq!(renewed.rendered("nome_paciente").as_deref(), Some("Maria"));
    }
}

//! Submitted field data and the flat string map handed to the form filler.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Date format used on every LME form field (`DD/MM/YYYY`).
pub const FORM_DATE_FORMAT: &str = "%d/%m/%Y";

/// A single submitted value.
///
/// Deserialisation is untagged: JSON/YAML booleans become [`FieldValue::Bool`], ISO
/// `YYYY-MM-DD` strings become [`FieldValue::Date`] and every other string is kept as
/// [`FieldValue::Text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    /// Renders the value the way it is written into a form field.
    ///
    /// Dates use [`FORM_DATE_FORMAT`]; booleans render as `True`/`False`.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Bool(true) => "True".to_owned(),
            FieldValue::Bool(false) => "False".to_owned(),
            FieldValue::Date(date) => date.format(FORM_DATE_FORMAT).to_string(),
            FieldValue::Text(text) => text.clone(),
        }
    }

    /// Returns the text content for [`FieldValue::Text`], otherwise `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// Field name to value mapping for one submission.
///
/// Keys are ordered so that rendering and logging are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionData(BTreeMap<String, FieldValue>);

impl SubmissionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Returns the rendered value of `key`, if present.
    pub fn rendered(&self, key: &str) -> Option<String> {
        self.0.get(key).map(FieldValue::render)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Renders every value into the flat string map consumed by the form filler.
    pub fn to_form_fields(&self) -> FormFields {
        FormFields(
            self.0
                .iter()
                .map(|(key, value)| (key.clone(), value.render()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for SubmissionData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Flat, fully rendered field map. This is the exact shape written into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormFields(BTreeMap<String, String>);

impl FormFields {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_deserialisation() {
        let data: SubmissionData = serde_json::from_str(
            r#"{"consentimento": true, "data_1": "2024-03-01", "cid": "G35", "relatorio": "False"}"#,
        )
        .unwrap();

        assert_eq!(data.get("consentimento"), Some(&FieldValue::Bool(true)));
        assert_eq!(
            data.get("data_1"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        assert_eq!(data.get("cid"), Some(&FieldValue::Text("G35".into())));
        assert_eq!(data.get("relatorio"), Some(&FieldValue::Text("False".into())));
    }

    #[test]
    fn test_render_values() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(FieldValue::Date(date).render(), "05/01/2024");
        assert_eq!(FieldValue::Bool(true).render(), "True");
        assert_eq!(FieldValue::Bool(false).render(), "False");
        assert_eq!(FieldValue::from("São Paulo").render(), "São Paulo");
    }

    #[test]
    fn test_to_form_fields_renders_every_key() {
        let data: SubmissionData = [
            ("nome_paciente", FieldValue::from("Maria")),
            ("incapaz", FieldValue::from(false)),
        ]
        .into_iter()
        .collect();

        let fields = data.to_form_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("nome_paciente"), Some("Maria"));
        assert_eq!(fields.get("incapaz"), Some("False"));
    }
}

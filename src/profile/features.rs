use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Questionnaire field name -> model feature name
pub static KEY_MAPPER: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("promedioEstudio", "study_hours_per_day");
    m.insert("redesSociales", "social_media_hours");
    m.insert("streaming", "netflix_hours");
    m.insert("asistencia", "attendance_percentage");
    m.insert("horasSueno", "sleep_hours");
    m.insert("diasEjercicio", "exercise_frequency");
    m.insert("calidadDieta", "diet_quality");
    m.insert("educacionPadres", "parental_education_level");
    m.insert("saludMental", "mental_health_rating");
    m.insert("actividadesExtra", "extracurricular_participation");
    m.insert("cargaAcademica", "academic_load");
    m.insert("metodoEstudio", "study_method");
    m.insert("motivacion", "motivation_level");
    m.insert("usaHerramientas", "time_management_tools");
    m.insert("nivelEstres", "stress_level");
    m.insert("trabaja", "part_time_job");
    m
});

// Answers kept as text even when they look numeric
const CATEGORICAL_FIELDS: [&str; 4] = ["genero", "calidadDieta", "educacionPadres", "metodoEstudio"];

// Yes/no questions, normalized to "Si"/"No"
const YES_NO_FIELDS: [&str; 3] = ["actividadesExtra", "trabaja", "usaHerramientas"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

impl FeatureValue {
    /// Category label used for one-hot encoding
    pub fn as_category(&self) -> String {
        match self {
            FeatureValue::Text(s) => s.clone(),
            FeatureValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            FeatureValue::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Missing form fields: {}", .0.join(", "))]
pub struct MissingFeatures(pub Vec<String>);

/// Translated questionnaire answers keyed by model feature name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    values: BTreeMap<String, FeatureValue>,
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in the order a model expects them. Every absent column is reported.
    pub fn select(&self, feature_names: &[String]) -> Result<Vec<FeatureValue>, MissingFeatures> {
        let missing: Vec<String> =
            feature_names.iter().filter(|name| !self.values.contains_key(*name)).cloned().collect();
        if !missing.is_empty() {
            return Err(MissingFeatures(missing));
        }
        Ok(feature_names.iter().filter_map(|name| self.values.get(name).cloned()).collect())
    }
}

/// Translate questionnaire answers into model features.
///
/// Unknown keys pass through unchanged. Text answers are read as numbers
/// unless they are yes/no answers or belong to a categorical question.
pub fn translate_form(form: &Map<String, Value>) -> FeatureRow {
    let mut values = BTreeMap::new();

    for (key, value) in form {
        let feature = KEY_MAPPER.get(key.as_str()).copied().unwrap_or(key.as_str());
        let translated = if YES_NO_FIELDS.contains(&key.as_str()) {
            Some(FeatureValue::Text(yes_no(value).to_string()))
        } else {
            translate_value(key, value)
        };
        match translated {
            Some(v) => {
                values.insert(feature.to_string(), v);
            }
            None => warn!("Ignoring unusable value for form field '{}': {}", key, value),
        }
    }

    FeatureRow { values }
}

fn translate_value(key: &str, value: &Value) -> Option<FeatureValue> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::Number(n) => n.as_f64().map(FeatureValue::Number),
        Value::Bool(b) => Some(FeatureValue::Text(if *b { "Si" } else { "No" }.to_string())),
        Value::String(s) => {
            let keep_text = CATEGORICAL_FIELDS.contains(&key) || is_yes_no_answer(s);
            match s.trim().parse::<f64>() {
                Ok(n) if !keep_text && n.is_finite() => Some(FeatureValue::Number(n)),
                _ => Some(FeatureValue::Text(s.clone())),
            }
        }
    }
}

fn is_yes_no_answer(s: &str) -> bool {
    matches!(s, "Sí" | "Si" | "No")
}

fn yes_no(value: &Value) -> &'static str {
    match value {
        Value::String(s) if matches!(s.trim(), "Sí" | "Si" | "sí" | "si") => "Si",
        Value::Bool(true) => "Si",
        _ => "No",
    }
}

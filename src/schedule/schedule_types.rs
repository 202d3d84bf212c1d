use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation stored on every imported event
pub const IMPORT_NOTE: &str = "Importado automáticamente.";

/// Colours handed out to new subjects, in order
pub const SUBJECT_PALETTE: [&str; 10] = [
    "#46487A", "#7786C6", "#D9534F", "#F0AD4E", "#FFC212", "#5CB85C", "#5BC0DE", "#F9B0C3",
    "#6C757D", "#343A40",
];

pub const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// Furthest `endDate` accepted, in weeks after the current week's Monday
pub const DEFAULT_MAX_WEEKS: u32 = 104;

/// One schedule entry as extracted by the model. Every field is untrusted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawScheduleEntry {
    #[serde(rename = "materia", default)]
    pub subject: Option<Value>,
    #[serde(rename = "diaSemana", default)]
    pub weekday: Option<Value>,
    #[serde(rename = "horaInicio", default)]
    pub start_time: Option<Value>,
    #[serde(rename = "horaFin", default)]
    pub end_time: Option<Value>,
}

impl RawScheduleEntry {
    pub fn new(subject: &str, weekday: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            subject: Some(Value::from(subject)),
            weekday: Some(Value::from(weekday)),
            start_time: Some(Value::from(start_time)),
            end_time: Some(Value::from(end_time)),
        }
    }

    /// Anything that is not a JSON object becomes an entry with no fields
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => Self {
                subject: map.remove("materia"),
                weekday: map.remove("diaSemana"),
                start_time: map.remove("horaInicio"),
                end_time: map.remove("horaFin"),
            },
            _ => Self::default(),
        }
    }
}

/// A schedule entry that passed validation: `end` is always after `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEntry {
    subject_name: String,
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
}

impl ValidatedEntry {
    pub(crate) fn new(subject_name: String, weekday: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        Self { subject_name, weekday, start, end }
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

/// Request body of the import endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload {
    pub file_data: Option<String>,
    pub file_type: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub message: String,
    pub processed: usize,
    pub skipped_entries: usize,
    pub subjects_created: usize,
    pub events_created: usize,
}

/// Source of "now", replaceable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

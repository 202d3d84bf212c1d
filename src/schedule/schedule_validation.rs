use super::schedule_types::{RawScheduleEntry, ValidatedEntry};
use chrono::{NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static WEEKDAYS: Lazy<HashMap<&'static str, Weekday>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("lunes", Weekday::Mon);
    m.insert("martes", Weekday::Tue);
    m.insert("miercoles", Weekday::Wed);
    m.insert("jueves", Weekday::Thu);
    m.insert("viernes", Weekday::Fri);
    m.insert("sabado", Weekday::Sat);
    m.insert("domingo", Weekday::Sun);
    m
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap_or_else(|e| panic!("invalid time regex: {}", e))
});

/// Why a raw entry was not turned into events
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    #[error("missing or non-text field '{0}'")]
    MissingField(&'static str),
    #[error("subject name is blank")]
    BlankSubject,
    #[error("unknown weekday '{0}'")]
    UnknownWeekday(String),
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("end time {end} is not after start time {start}")]
    EndNotAfterStart { start: NaiveTime, end: NaiveTime },
}

pub fn validate(raw: &RawScheduleEntry) -> Result<ValidatedEntry, RejectionReason> {
    let subject = text_field(&raw.subject, "materia")?;
    let weekday = text_field(&raw.weekday, "diaSemana")?;
    let start = text_field(&raw.start_time, "horaInicio")?;
    let end = text_field(&raw.end_time, "horaFin")?;

    let subject = subject.trim();
    if subject.is_empty() {
        return Err(RejectionReason::BlankSubject);
    }

    let weekday = normalize_weekday(weekday)
        .ok_or_else(|| RejectionReason::UnknownWeekday(weekday.to_string()))?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;

    if end <= start {
        return Err(RejectionReason::EndNotAfterStart { start, end });
    }

    Ok(ValidatedEntry::new(subject.to_string(), weekday, start, end))
}

fn text_field<'a>(value: &'a Option<Value>, name: &'static str) -> Result<&'a str, RejectionReason> {
    match value {
        Some(Value::String(s)) => Ok(s),
        _ => Err(RejectionReason::MissingField(name)),
    }
}

/// Map a Spanish weekday name to a weekday, ignoring case, accents and padding
pub fn normalize_weekday(name: &str) -> Option<Weekday> {
    let folded: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect();
    WEEKDAYS.get(folded.as_str()).copied()
}

/// Canonical Spanish name of a weekday
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "lunes",
        Weekday::Tue => "martes",
        Weekday::Wed => "miercoles",
        Weekday::Thu => "jueves",
        Weekday::Fri => "viernes",
        Weekday::Sat => "sabado",
        Weekday::Sun => "domingo",
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, RejectionReason> {
    let invalid = || RejectionReason::InvalidTime(value.to_string());
    let caps = TIME_RE.captures(value.trim()).ok_or_else(invalid)?;
    let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
    let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

use super::ExtractionError;
use crate::schedule::RawScheduleEntry;
use log::{debug, warn};
use serde_json::Value;

/// Parse model output into raw schedule entries.
///
/// The text is first parsed as-is after stripping Markdown fences. If that
/// fails, the slice between the first `[` and the last `]` is tried, which
/// recovers lists wrapped in prose.
pub fn parse_schedule_response(text: &str) -> Result<Vec<RawScheduleEntry>, ExtractionError> {
    let cleaned = strip_code_fences(text);

    let value = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => value,
        Err(strict_err) => {
            debug!("Strict parse of model output failed: {}", strict_err);
            let sliced = bracket_slice(cleaned).ok_or(ExtractionError::MalformedJson)?;
            let value = serde_json::from_str::<Value>(sliced)
                .map_err(|_| ExtractionError::MalformedJson)?;
            warn!("Recovered JSON list from surrounding text in model output");
            value
        }
    };

    match value {
        Value::Array(items) => Ok(items.into_iter().map(RawScheduleEntry::from_value).collect()),
        _ => Err(ExtractionError::NotAList),
    }
}

fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop an optional language tag such as ```json
        cleaned = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    }
    if let Some(rest) = cleaned.trim_end().strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

fn bracket_slice(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

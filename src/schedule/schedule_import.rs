use super::recurrence::{Occurrence, expand, start_of_week};
use super::schedule_types::{
    Clock, DEFAULT_FILE_TYPE, DEFAULT_MAX_WEEKS, IMPORT_NOTE, ImportPayload, ImportSummary, RawScheduleEntry,
    SystemClock, ValidatedEntry,
};
use super::schedule_validation::validate;
use super::subject_resolver::SubjectResolver;
use super::ImportError;
use crate::auth::{TokenVerifier, bearer_token};
use crate::extraction::{ScheduleExtractor, parse_schedule_response};
use crate::store::{self, DocumentStore, FieldValue, Fields, WriteBatch};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Validated top-level input of one import request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub file: Vec<u8>,
    pub mime_type: String,
    pub until: NaiveDate,
}

impl ImportRequest {
    /// Validate the payload. `latest` is the furthest end date accepted.
    pub fn from_payload(payload: ImportPayload, latest: NaiveDate) -> Result<Self, ImportError> {
        let file_data = non_blank(payload.file_data);
        let end_date = non_blank(payload.end_date);
        let (Some(file_data), Some(end_date)) = (file_data, end_date) else {
            return Err(ImportError::BadRequest("Missing fileData or endDate.".to_string()));
        };

        let until = parse_until_date(&end_date).ok_or_else(|| {
            ImportError::BadRequest("Invalid endDate format (use ISO 8601).".to_string())
        })?;
        if until > latest {
            return Err(ImportError::BadRequest(format!(
                "endDate is too far in the future (latest allowed: {}).",
                latest
            )));
        }
        let file = decode_file_data(&file_data).ok_or_else(|| {
            ImportError::BadRequest("Invalid fileData format (base64).".to_string())
        })?;
        let mime_type =
            non_blank(payload.file_type).unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());

        Ok(Self { file, mime_type, until })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Calendar date of an ISO 8601 end date. Any UTC offset is dropped and the
/// wall-clock date is kept.
pub fn parse_until_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local().date());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Decode standard base64, tolerating whitespace and a `data:<mime>;base64,` prefix
pub fn decode_file_data(value: &str) -> Option<Vec<u8>> {
    let trimmed = value.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data)?,
        None => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    STANDARD.decode(compact.as_bytes()).ok()
}

/// Counters for one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportRun {
    pub processed: usize,
    pub skipped: usize,
    pub subjects_created: usize,
    pub events_created: usize,
}

impl ImportRun {
    pub fn summary(&self) -> ImportSummary {
        let mut message = format!("Importación completada. {} eventos creados.", self.events_created);
        if self.subjects_created > 0 {
            message.push_str(&format!(" {} materias nuevas añadidas.", self.subjects_created));
        }
        if self.skipped > 0 {
            message.push_str(&format!(
                " {} entradas inválidas del horario fueron omitidas.",
                self.skipped
            ));
        }
        ImportSummary {
            message,
            processed: self.processed,
            skipped_entries: self.skipped,
            subjects_created: self.subjects_created,
            events_created: self.events_created,
        }
    }
}

pub struct ScheduleImporter {
    verifier: Arc<dyn TokenVerifier>,
    extractor: Arc<dyn ScheduleExtractor>,
    store: Arc<dyn DocumentStore>,
    tz: Tz,
    max_weeks: u32,
    clock: Arc<dyn Clock>,
}

impl ScheduleImporter {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        extractor: Arc<dyn ScheduleExtractor>,
        store: Arc<dyn DocumentStore>,
        tz: Tz,
    ) -> Self {
        Self {
            verifier,
            extractor,
            store,
            tz,
            max_weeks: DEFAULT_MAX_WEEKS,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_max_weeks(mut self, max_weeks: u32) -> Self {
        self.max_weeks = max_weeks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run a whole import for the caller identified by `authorization`
    pub async fn import(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<ImportSummary, ImportError> {
        let user_id = self.authenticate(authorization).await?;

        let payload: ImportPayload = serde_json::from_slice(body)
            .map_err(|e| ImportError::BadRequest(format!("Request must be JSON: {}", e)))?;
        let request = ImportRequest::from_payload(payload, self.latest_end_date())?;
        info!(
            "Import request validated for {} until {}, type: {}",
            user_id, request.until, request.mime_type
        );

        let text = self.extractor.extract(&request.file, &request.mime_type).await?;
        let entries = parse_schedule_response(&text)?;
        info!("Extracted {} schedule entries", entries.len());

        let run = self.materialize(&user_id, &entries, request.until).await?;
        info!(
            "Import summary for {}: processed={}, skipped={}, subjects={}, events={}",
            user_id, run.processed, run.skipped, run.subjects_created, run.events_created
        );
        Ok(run.summary())
    }

    fn latest_end_date(&self) -> NaiveDate {
        start_of_week(self.clock.now(), self.tz)
            .checked_add_days(Days::new(7 * u64::from(self.max_weeks)))
            .unwrap_or(NaiveDate::MAX)
    }

    async fn authenticate(&self, authorization: Option<&str>) -> Result<String, ImportError> {
        let token = bearer_token(authorization).ok_or_else(|| {
            warn!("Import rejected: missing or malformed Authorization header");
            ImportError::missing_token()
        })?;

        self.verifier.verify(token).await.map_err(|e| {
            warn!("Token verification failed: {:#}", e);
            ImportError::Unauthorized("Invalid or expired token.".to_string())
        })
    }

    /// Turn extracted entries into subject and event writes and commit them
    pub async fn materialize(
        &self,
        user_id: &str,
        entries: &[RawScheduleEntry],
        until: NaiveDate,
    ) -> Result<ImportRun, ImportError> {
        let subjects_collection = store::user_collection(user_id, store::SUBJECTS);
        let events_collection = store::user_collection(user_id, store::EVENTS);

        let existing = self.store.list(&subjects_collection).await.map_err(|e| {
            error!("Failed to load subjects for {}: {:#}", user_id, e);
            ImportError::PersistenceFailure(e.to_string())
        })?;
        let mut resolver = SubjectResolver::from_snapshot(&subjects_collection, &existing);

        let week_start = start_of_week(self.clock.now(), self.tz);
        debug!("Expanding occurrences from {} to {}", week_start, until);

        let mut run = ImportRun::default();
        let mut batch = WriteBatch::new();

        for raw in entries {
            run.processed += 1;
            let entry = match validate(raw) {
                Ok(entry) => entry,
                Err(reason) => {
                    warn!("Skipping entry #{}: {}. Received: {:?}", run.processed, reason, raw);
                    run.skipped += 1;
                    continue;
                }
            };

            let subject =
                resolver.resolve(entry.subject_name(), &mut batch, || self.store.new_document_id());

            let occurrences =
                expand(entry.weekday(), entry.start(), entry.end(), week_start, until, self.tz);
            for occurrence in &occurrences {
                let fields = event_fields(&entry, occurrence, &subject.id, user_id);
                batch.create(&events_collection, &self.store.new_document_id(), fields);
            }
            if !occurrences.is_empty() {
                debug!(
                    "Generated {} occurrences for '{}' on {}",
                    occurrences.len(),
                    entry.subject_name(),
                    entry.weekday()
                );
            }
            run.events_created += occurrences.len();
        }
        run.subjects_created = resolver.created_count();

        if batch.is_empty() {
            info!("No new subjects or events to save for {}", user_id);
            return Ok(run);
        }

        info!(
            "Saving {} new subjects and {} new events for {}",
            run.subjects_created, run.events_created, user_id
        );
        self.store.commit(batch).await.map_err(|e| {
            error!("Batch commit failed for {}: {:#}", user_id, e);
            ImportError::PersistenceFailure(e.to_string())
        })?;
        Ok(run)
    }
}

fn event_fields(entry: &ValidatedEntry, occurrence: &Occurrence, subject_id: &str, user_id: &str) -> Fields {
    let mut owner = Fields::new();
    owner.insert("uid".to_string(), user_id.into());

    let mut fields = Fields::new();
    fields.insert("title".to_string(), entry.subject_name().into());
    fields.insert("start".to_string(), FieldValue::timestamp(&occurrence.start));
    fields.insert("end".to_string(), FieldValue::timestamp(&occurrence.end));
    fields.insert("subject".to_string(), subject_id.into());
    fields.insert("notes".to_string(), IMPORT_NOTE.into());
    fields.insert("user".to_string(), FieldValue::Map(owner));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn latest() -> NaiveDate {
        date(2026, 12, 31)
    }

    #[test_case("2025-06-30" ; "date only")]
    #[test_case("2025-06-30T00:00:00.000Z" ; "utc from browser")]
    #[test_case("2025-06-30T23:30:00-06:00" ; "with offset")]
    #[test_case("2025-06-30T08:15:00" ; "naive datetime")]
    #[test_case(" 2025-06-30T08:15 " ; "minutes only with padding")]
    fn test_parse_until_date(value: &str) {
        assert_eq!(parse_until_date(value), Some(date(2025, 6, 30)));
    }

    #[test_case("30/06/2025" ; "day first")]
    #[test_case("2025-13-01" ; "bad month")]
    #[test_case("tomorrow" ; "words")]
    fn test_parse_until_date_rejects(value: &str) {
        assert_eq!(parse_until_date(value), None);
    }

    #[test]
    fn test_decode_file_data() {
        assert_eq!(decode_file_data("aGVsbG8="), Some(b"hello".to_vec()));
        assert_eq!(decode_file_data("aGVs\nbG8="), Some(b"hello".to_vec()));
        assert_eq!(decode_file_data("data:image/png;base64,aGVsbG8="), Some(b"hello".to_vec()));
        assert_eq!(decode_file_data("not base64!"), None);
        assert_eq!(decode_file_data("data:image/png;base64"), None);
    }

    #[test]
    fn test_payload_requires_file_and_date() {
        let payload = ImportPayload { file_data: Some("aGVsbG8=".to_string()), ..Default::default() };
        assert!(matches!(ImportRequest::from_payload(payload, latest()), Err(ImportError::BadRequest(_))));

        let payload = ImportPayload {
            file_data: Some("  ".to_string()),
            end_date: Some("2025-06-30".to_string()),
            ..Default::default()
        };
        assert!(matches!(ImportRequest::from_payload(payload, latest()), Err(ImportError::BadRequest(_))));
    }

    #[test]
    fn test_payload_defaults_file_type() {
        let payload = ImportPayload {
            file_data: Some("aGVsbG8=".to_string()),
            file_type: None,
            end_date: Some("2025-06-30".to_string()),
        };
        let request = ImportRequest::from_payload(payload, latest()).unwrap();
        assert_eq!(request.mime_type, DEFAULT_FILE_TYPE);
        assert_eq!(request.file, b"hello".to_vec());
    }

    #[test_case("2027-01-01" ; "day after horizon")]
    #[test_case("9999-12-31" ; "far future")]
    #[test_case("+262142-12-31" ; "last representable date")]
    fn test_payload_rejects_end_date_past_horizon(end_date: &str) {
        let payload = ImportPayload {
            file_data: Some("aGVsbG8=".to_string()),
            file_type: None,
            end_date: Some(end_date.to_string()),
        };
        match ImportRequest::from_payload(payload, latest()) {
            Err(ImportError::BadRequest(message)) => assert!(message.contains("2026-12-31")),
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_accepts_horizon_day() {
        let payload = ImportPayload {
            file_data: Some("aGVsbG8=".to_string()),
            file_type: None,
            end_date: Some("2026-12-31".to_string()),
        };
        let request = ImportRequest::from_payload(payload, latest()).unwrap();
        assert_eq!(request.until, latest());
    }

    #[test]
    fn test_summary_message() {
        let run = ImportRun { processed: 4, skipped: 1, subjects_created: 2, events_created: 9 };
        assert_eq!(
            run.summary().message,
            "Importación completada. 9 eventos creados. 2 materias nuevas añadidas. 1 entradas inválidas del horario fueron omitidas."
        );

        let empty = ImportRun::default().summary();
        assert_eq!(empty.message, "Importación completada. 0 eventos creados.");
    }
}

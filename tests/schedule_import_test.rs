use agenda::auth::TokenVerifier;
use agenda::extraction::{ExtractionError, ScheduleExtractor};
use agenda::schedule::{FixedClock, IMPORT_NOTE, ImportError, ScheduleImporter, SUBJECT_PALETTE};
use agenda::store::{DocumentStore, FieldValue, MemoryStore};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use chrono_tz::America::Mexico_City;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const SUBJECTS: &str = "users/student-1/subjects";
const EVENTS: &str = "users/student-1/events";

struct FakeVerifier;

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        match token {
            "valid-token" => Ok("student-1".to_string()),
            _ => Err(anyhow!("Token has expired")),
        }
    }
}

struct FakeExtractor {
    output: String,
    calls: AtomicUsize,
}

impl FakeExtractor {
    fn new(output: &str) -> Arc<Self> {
        Arc::new(Self { output: output.to_string(), calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleExtractor for FakeExtractor {
    async fn extract(&self, file: &[u8], mime_type: &str) -> Result<String, ExtractionError> {
        assert_eq!(file, b"hello");
        assert_eq!(mime_type, "image/png");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

// Wednesday 2025-03-12 noon in Mexico City; the current week starts Monday 2025-03-10
fn importer(extractor: Arc<FakeExtractor>, store: Arc<MemoryStore>) -> ScheduleImporter {
    let now = Utc.with_ymd_and_hms(2025, 3, 12, 18, 0, 0).unwrap();
    ScheduleImporter::new(Arc::new(FakeVerifier), extractor, store, Mexico_City)
        .with_clock(Arc::new(FixedClock(now)))
}

fn body(end_date: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "fileData": "aGVsbG8=",
        "fileType": "image/png",
        "endDate": end_date,
    }))
    .unwrap()
}

fn entries(items: serde_json::Value) -> String {
    items.to_string()
}

const BEARER: Option<&str> = Some("Bearer valid-token");

#[tokio::test]
async fn empty_schedule_creates_nothing() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new("[]");

    let summary = importer(extractor, store.clone()).import(BEARER, &body("2025-03-30")).await?;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped_entries, 0);
    assert_eq!(summary.subjects_created, 0);
    assert_eq!(summary.events_created, 0);
    assert_eq!(store.commit_count(), 0);
    Ok(())
}

#[tokio::test]
async fn weekly_class_expands_until_end_date() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Calculus I", "diaSemana": "lunes", "horaInicio": "09:00", "horaFin": "10:30" }
    ])));

    let summary = importer(extractor, store.clone())
        .import(BEARER, &body("2025-03-30T06:00:00.000Z"))
        .await?;

    assert_eq!(summary.events_created, 3);
    assert_eq!(summary.subjects_created, 1);
    assert_eq!(summary.skipped_entries, 0);
    assert_eq!(summary.message, "Importación completada. 3 eventos creados. 1 materias nuevas añadidas.");
    assert_eq!(store.commit_count(), 1);

    let subjects = store.documents(SUBJECTS)?;
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].get("name"), Some(&FieldValue::from("Calculus I")));
    assert_eq!(subjects[0].get("color"), Some(&FieldValue::from(SUBJECT_PALETTE[0])));

    let events = store.documents(EVENTS)?;
    let mut starts: Vec<String> = events
        .iter()
        .map(|e| match e.get("start") {
            Some(FieldValue::Timestamp(ts)) => ts.to_rfc3339(),
            other => panic!("unexpected start: {:?}", other),
        })
        .collect();
    starts.sort();
    assert_eq!(
        starts,
        vec![
            "2025-03-10T09:00:00-06:00",
            "2025-03-17T09:00:00-06:00",
            "2025-03-24T09:00:00-06:00",
        ]
    );

    for event in &events {
        assert_eq!(event.get("title"), Some(&FieldValue::from("Calculus I")));
        assert_eq!(event.get("subject"), Some(&FieldValue::from(subjects[0].id.clone())));
        assert_eq!(event.get("notes"), Some(&FieldValue::from(IMPORT_NOTE)));
        let owner = event.get("user").and_then(|u| u.as_map()).expect("user map");
        assert_eq!(owner.get("uid"), Some(&FieldValue::from("student-1")));
    }
    Ok(())
}

#[tokio::test]
async fn end_before_start_is_skipped() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Física", "diaSemana": "martes", "horaInicio": "10:00", "horaFin": "09:00" }
    ])));

    let summary = importer(extractor, store.clone()).import(BEARER, &body("2025-03-30")).await?;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped_entries, 1);
    assert_eq!(summary.events_created, 0);
    assert_eq!(summary.subjects_created, 0);
    assert_eq!(store.commit_count(), 0);
    Ok(())
}

#[tokio::test]
async fn subject_names_differing_in_case_share_one_subject() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Calculus I", "diaSemana": "lunes", "horaInicio": "09:00", "horaFin": "10:30" },
        { "materia": "calculus i", "diaSemana": "Miércoles", "horaInicio": "09:00", "horaFin": "10:30" }
    ])));

    let summary = importer(extractor, store.clone()).import(BEARER, &body("2025-03-30")).await?;

    assert_eq!(summary.subjects_created, 1);
    assert_eq!(summary.events_created, 6);

    let subjects = store.documents(SUBJECTS)?;
    assert_eq!(subjects.len(), 1);
    let subject_id = FieldValue::from(subjects[0].id.clone());
    for event in store.documents(EVENTS)? {
        assert_eq!(event.get("subject"), Some(&subject_id));
    }
    Ok(())
}

#[tokio::test]
async fn missing_or_expired_token_is_rejected_before_extraction() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new("[]");
    let importer = importer(extractor.clone(), store.clone());

    for header in [None, Some("Bearer expired-token"), Some("Token valid-token")] {
        let result = importer.import(header, &body("2025-03-30")).await;
        assert!(matches!(result, Err(ImportError::Unauthorized(_))), "header {:?}", header);
    }
    assert_eq!(extractor.calls(), 0);
    assert_eq!(store.commit_count(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_input_is_rejected_before_extraction() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new("[]");
    let importer = importer(extractor.clone(), store.clone());

    let bad_date = importer.import(BEARER, &body("30/03/2025")).await;
    assert!(matches!(bad_date, Err(ImportError::BadRequest(_))));

    let bad_file = serde_json::to_vec(&json!({ "fileData": "%%%", "endDate": "2025-03-30" }))?;
    assert!(matches!(importer.import(BEARER, &bad_file).await, Err(ImportError::BadRequest(_))));

    let missing = serde_json::to_vec(&json!({ "endDate": "2025-03-30" }))?;
    assert!(matches!(importer.import(BEARER, &missing).await, Err(ImportError::BadRequest(_))));

    assert!(matches!(importer.import(BEARER, b"not json").await, Err(ImportError::BadRequest(_))));

    assert_eq!(extractor.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn end_date_past_the_horizon_is_rejected_before_extraction() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Calculus I", "diaSemana": "lunes", "horaInicio": "09:00", "horaFin": "10:30" }
    ])));
    let importer = importer(extractor.clone(), store.clone()).with_max_weeks(4);

    for end_date in ["2025-04-08", "9999-12-31", "+262142-12-31"] {
        let result = importer.import(BEARER, &body(end_date)).await;
        assert!(matches!(result, Err(ImportError::BadRequest(_))), "endDate {}", end_date);
    }
    assert_eq!(extractor.calls(), 0);
    assert_eq!(store.commit_count(), 0);

    // Monday 2025-03-10 plus four weeks is the last accepted day
    let summary = importer.import(BEARER, &body("2025-04-07")).await?;
    assert_eq!(summary.events_created, 5);
    Ok(())
}

#[tokio::test]
async fn class_earlier_in_the_current_week_is_still_created() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Física", "diaSemana": "martes", "horaInicio": "07:00", "horaFin": "08:00" }
    ])));

    // The clock reads Wednesday 2025-03-12, so Tuesday's class already happened
    let summary = importer(extractor, store.clone()).import(BEARER, &body("2025-03-16")).await?;

    assert_eq!(summary.events_created, 1);
    let events = store.documents(EVENTS)?;
    assert_eq!(events.len(), 1);
    match events[0].get("start") {
        Some(FieldValue::Timestamp(ts)) => assert_eq!(ts.to_rfc3339(), "2025-03-11T07:00:00-06:00"),
        other => panic!("unexpected start: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn fenced_and_prose_wrapped_output_is_recovered() -> Result<()> {
    let list = r#"[{"materia":"Historia","diaSemana":"viernes","horaInicio":"12:00","horaFin":"13:00"}]"#;

    for output in [format!("```json\n{}\n```", list), format!("Aquí tienes el horario: {} ¡Suerte!", list)] {
        let store = Arc::new(MemoryStore::new());
        let summary =
            importer(FakeExtractor::new(&output), store.clone()).import(BEARER, &body("2025-03-23")).await?;
        // Fridays 03-14 and 03-21
        assert_eq!(summary.events_created, 2);
    }
    Ok(())
}

#[tokio::test]
async fn object_shaped_output_is_an_extraction_failure() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(r#"{"materia":"Historia","diaSemana":"viernes"}"#);

    let result = importer(extractor, store.clone()).import(BEARER, &body("2025-03-30")).await;

    assert!(matches!(result, Err(ImportError::ExtractionFailure(ExtractionError::NotAList))));
    assert_eq!(store.commit_count(), 0);
    Ok(())
}

#[tokio::test]
async fn unparsable_output_is_an_extraction_failure() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new("Lo siento, no pude leer el archivo.");

    let result = importer(extractor, store).import(BEARER, &body("2025-03-30")).await;
    assert!(matches!(result, Err(ImportError::ExtractionFailure(ExtractionError::MalformedJson))));
    Ok(())
}

#[tokio::test]
async fn commit_failure_persists_nothing() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.fail_commits(true);
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Química", "diaSemana": "jueves", "horaInicio": "11:00", "horaFin": "12:00" }
    ])));

    let result = importer(extractor, store.clone()).import(BEARER, &body("2025-03-30")).await;

    assert!(matches!(result, Err(ImportError::PersistenceFailure(_))));
    assert!(store.list(SUBJECTS).await?.is_empty());
    assert!(store.list(EVENTS).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_entries_are_counted_and_skipped() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Arte", "diaSemana": "lunes", "horaInicio": "08:00", "horaFin": "09:00" },
        { "materia": "Arte", "diaSemana": "someday", "horaInicio": "08:00", "horaFin": "09:00" },
        { "materia": "", "diaSemana": "lunes", "horaInicio": "08:00", "horaFin": "09:00" },
        { "materia": "Música", "diaSemana": "lunes", "horaInicio": null, "horaFin": "09:00" },
        "lunes 08:00"
    ])));

    let summary = importer(extractor, store.clone()).import(BEARER, &body("2025-03-16")).await?;

    assert_eq!(summary.processed, 5);
    assert_eq!(summary.skipped_entries, 4);
    assert_eq!(summary.subjects_created, 1);
    assert_eq!(summary.events_created, 1);
    assert!(summary.message.ends_with("4 entradas inválidas del horario fueron omitidas."));
    Ok(())
}

#[tokio::test]
async fn second_import_reuses_existing_subjects() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let output = entries(json!([
        { "materia": "Biología", "diaSemana": "martes", "horaInicio": "07:00", "horaFin": "08:00" }
    ]));

    let first = importer(FakeExtractor::new(&output), store.clone()).import(BEARER, &body("2025-03-16")).await?;
    assert_eq!(first.subjects_created, 1);

    let second = importer(FakeExtractor::new(&output), store.clone()).import(BEARER, &body("2025-03-16")).await?;
    assert_eq!(second.subjects_created, 0);
    assert_eq!(second.events_created, 1);

    assert_eq!(store.documents(SUBJECTS)?.len(), 1);
    assert_eq!(store.documents(EVENTS)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn subject_is_created_even_without_occurrences() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let extractor = FakeExtractor::new(&entries(json!([
        { "materia": "Ética", "diaSemana": "domingo", "horaInicio": "10:00", "horaFin": "11:00" }
    ])));

    // Sunday 03-16 is after the end date
    let summary = importer(extractor, store.clone()).import(BEARER, &body("2025-03-14")).await?;

    assert_eq!(summary.events_created, 0);
    assert_eq!(summary.subjects_created, 1);
    assert_eq!(store.documents(SUBJECTS)?.len(), 1);
    Ok(())
}

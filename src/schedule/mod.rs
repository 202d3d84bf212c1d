//! Schedule import: from an uploaded timetable to recurring calendar events.
//
// The importer authenticates the caller, asks the extractor to read the file,
// validates each extracted entry, resolves subjects, expands weekly
// recurrences and writes everything in one batch.

use crate::extraction::ExtractionError;

pub mod recurrence;
mod schedule_import;
mod schedule_types;
mod schedule_validation;
mod subject_resolver;

pub use recurrence::{Occurrence, expand, start_of_week};
pub use schedule_import::*;
pub use schedule_types::*;
pub use schedule_validation::*;
pub use subject_resolver::*;

/// Failures that abort an import. Nothing is persisted when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Error analyzing the file: {0}")]
    ExtractionFailure(#[from] ExtractionError),
    #[error("Error saving the imported schedule: {0}")]
    PersistenceFailure(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ImportError {
    pub fn missing_token() -> Self {
        ImportError::Unauthorized("Unauthorized: Missing or invalid token.".to_string())
    }
}

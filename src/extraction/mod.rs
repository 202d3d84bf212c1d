//! Schedule extraction from uploaded documents.
//
// The extractor returns the model's raw text; `response::parse_schedule_response`
// turns that text into raw entries for validation.

pub mod gemini;
pub mod response;

pub use response::parse_schedule_response;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("The model blocked the response for safety reasons: {0}")]
    Blocked(String),
    #[error("The model returned an incomplete response: {0}")]
    Incomplete(String),
    #[error("The model returned a response without content")]
    Empty,
    #[error("The model response is not valid JSON")]
    MalformedJson,
    #[error("The model response is not a JSON list")]
    NotAList,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Reads a schedule document and returns the model output as text
#[async_trait]
pub trait ScheduleExtractor: Send + Sync {
    async fn extract(&self, file: &[u8], mime_type: &str) -> Result<String, ExtractionError>;
}

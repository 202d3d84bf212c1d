//! Vertex AI Gemini client for reading schedule images and PDFs.

use super::{ExtractionError, ScheduleExtractor};
use crate::config::{GoogleConfig, ImportConfig};
use crate::gcp::AccessTokenProvider;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const EXTRACTION_PROMPT: &str = "Analiza imagen/PDF de horario. Extrae clases semanales. \
Devuelve SOLAMENTE lista JSON: [{'materia': string, 'diaSemana': string(Español minúsculas sin acentos, ej: lunes, miercoles), \
'horaInicio': string(HH:MM 24h), 'horaFin': string(HH:MM 24h)}]. Ignora otros textos. No uses null. No inventes. \
Ej: [{'materia': 'Calculo I', 'diaSemana': 'lunes', 'horaInicio': '09:00', 'horaFin': '10:30'}, ...]";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const BLOCK_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    #[serde(rename_all = "camelCase")]
    Inline { inline_data: InlineData<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate, if the model finished normally
    fn response_text(self) -> Result<String, ExtractionError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ExtractionError::Blocked(reason));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ExtractionError::Incomplete("no candidates".to_string()))?;

        match candidate.finish_reason.as_deref() {
            Some("STOP") => {}
            Some("SAFETY") => {
                let ratings = serde_json::to_string(&candidate.safety_ratings)
                    .unwrap_or_else(|_| "N/A".to_string());
                return Err(ExtractionError::Blocked(ratings));
            }
            Some(other) => return Err(ExtractionError::Incomplete(other.to_string())),
            None => return Err(ExtractionError::Incomplete("missing finish reason".to_string())),
        }

        candidate
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or(ExtractionError::Empty)
    }
}

pub struct GeminiExtractor {
    client: Client,
    tokens: Arc<AccessTokenProvider>,
    endpoint: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiExtractor {
    pub fn new(
        client: Client,
        tokens: Arc<AccessTokenProvider>,
        project_id: &str,
        google: &GoogleConfig,
        import: &ImportConfig,
    ) -> Self {
        let endpoint = format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:generateContent",
            loc = google.location,
            project = project_id,
            model = google.vision_model,
        );
        info!("Gemini extractor using model {}", google.vision_model);
        Self {
            client,
            tokens,
            endpoint,
            temperature: import.temperature,
            max_output_tokens: import.max_output_tokens,
        }
    }

    fn build_request<'a>(&self, file: &[u8], mime_type: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    RequestPart::Inline {
                        inline_data: InlineData { mime_type, data: STANDARD.encode(file) },
                    },
                    RequestPart::Text { text: EXTRACTION_PROMPT },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
            safety_settings: HARM_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting { category, threshold: BLOCK_THRESHOLD })
                .collect(),
        }
    }
}

#[async_trait]
impl ScheduleExtractor for GeminiExtractor {
    async fn extract(&self, file: &[u8], mime_type: &str) -> Result<String, ExtractionError> {
        debug!("Sending {} bytes ({}) to Gemini", file.len(), mime_type);
        let token = self.tokens.access_token().await?;
        let request = self.build_request(file, mime_type);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .context("Failed to reach Vertex AI")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gemini request failed with {}: {}", status, body);
            return Err(anyhow!("Gemini request failed with {}", status).into());
        }

        let parsed: GenerateContentResponse =
            response.json().await.context("Failed to parse Gemini response")?;
        let text = parsed.response_text()?;
        debug!("Gemini returned {} characters", text.len());
        Ok(text)
    }
}

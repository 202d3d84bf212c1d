use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::auth::bearer_token;
use crate::config::Config;
use crate::profile::{ProfileError, parse_profile_request};
use crate::resources::Resources;
use crate::schedule::{ImportError, ImportSummary, ScheduleImporter};

// State shared across handlers
pub struct AppState {
    pub resources: Resources,
    pub tz: Tz,
}

impl AppState {
    pub fn new(resources: Resources) -> Result<Self> {
        let tz = resources.config().timezone()?;
        Ok(Self { resources, tz })
    }
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        let status = match &self {
            ImportError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ImportError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ImportError::ExtractionFailure(_) | ImportError::PersistenceFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ImportError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        error_response(status, self.to_string())
    }
}

impl IntoResponse for ProfileError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProfileError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        error_response(status, self.to_string())
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    if status.is_server_error() {
        error!("Request failed with {}: {}", status, message);
    } else {
        warn!("Request rejected with {}: {}", status, message);
    }
    (status, Json(json!({ "error": message }))).into_response()
}

fn unavailable(e: anyhow::Error) -> ImportError {
    ImportError::Unavailable(format!("{:#}", e))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn import_schedule_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ImportSummary>, ImportError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    // Requests without credentials never touch the lazy resources
    if bearer_token(authorization).is_none() {
        return Err(ImportError::missing_token());
    }

    let resources = &state.resources;
    let verifier = resources.verifier().await.map_err(unavailable)?;
    let extractor = resources.extractor().await.map_err(unavailable)?;
    let store = resources.store().await.map_err(unavailable)?;

    let importer = ScheduleImporter::new(verifier, extractor, store, state.tz)
        .with_max_weeks(resources.config().import.max_weeks);
    let summary = importer.import(authorization, &body).await?;
    Ok(Json(summary))
}

async fn predict_profile_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ProfileError> {
    let classifier = state
        .resources
        .classifier()
        .await
        .map_err(|e| ProfileError::Model(format!("Failed to load K-means model: {:#}", e)))?;

    let form = parse_profile_request(&body)?;
    let cluster = classifier.classify(&form)?;
    Ok(Json(json!({ "cluster": cluster })))
}

/// Fixed permissive policy; preflight requests are answered by the layer
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
        .max_age(Duration::from_secs(3600))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/importSchedule", post(import_schedule_handler))
        .route("/predictStudentProfile", post(predict_profile_handler))
        .layer(cors_layer())
        .with_state(state)
}

pub async fn start_api_server(config: Config, bind: Option<String>) -> Result<()> {
    let addr = bind.unwrap_or_else(|| config.bind_address());
    let state = Arc::new(AppState::new(Resources::new(config)?)?);
    let app = router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Failed to bind to address {}: {}", addr, e))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow!("Failed to start API server: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenVerifier;
    use crate::config::StoreBackend;
    use crate::extraction::{ExtractionError, ScheduleExtractor};
    use crate::profile::ProfileClassifier;
    use crate::profile::model::{FeatureSpec, KMeansModel, Preprocessor};
    use crate::store::{DocumentStore, MemoryStore};
    use async_trait::async_trait;

    struct AcceptGood;

    #[async_trait]
    impl TokenVerifier for AcceptGood {
        async fn verify(&self, token: &str) -> Result<String> {
            if token == "good" { Ok("u1".to_string()) } else { Err(anyhow!("expired")) }
        }
    }

    struct CannedExtractor(&'static str);

    #[async_trait]
    impl ScheduleExtractor for CannedExtractor {
        async fn extract(&self, _file: &[u8], _mime: &str) -> Result<String, ExtractionError> {
            Ok(self.0.to_string())
        }
    }

    async fn spawn_server(extractor_output: &'static str) -> Result<(String, Arc<MemoryStore>)> {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        let store = Arc::new(MemoryStore::new());
        let store_handle: Arc<dyn DocumentStore> = store.clone();

        let classifier = ProfileClassifier::new(
            Preprocessor {
                features: vec![FeatureSpec::Numeric {
                    name: "motivation_level".to_string(),
                    mean: 5.0,
                    scale: 1.0,
                }],
            },
            KMeansModel { centroids: vec![vec![-2.0], vec![2.0]] },
        );
        let resources = Resources::new(config)?
            .with_store(store_handle)
            .with_verifier(Arc::new(AcceptGood))
            .with_extractor(Arc::new(CannedExtractor(extractor_output)))
            .with_classifier(classifier);

        let app = router(Arc::new(AppState::new(resources)?));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((format!("http://{}", addr), store))
    }

    #[tokio::test]
    async fn test_health() -> Result<()> {
        let (base, _) = spawn_server("[]").await?;
        let response = reqwest::get(format!("{}/health", base)).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_preflight_is_answered() -> Result<()> {
        let (base, _) = spawn_server("[]").await?;
        let response = reqwest::Client::new()
            .request(Method::OPTIONS, format!("{}/importSchedule", base))
            .header("Origin", "https://agenda.example")
            .header("Access-Control-Request-Method", "POST")
            .header("Access-Control-Request-Headers", "authorization,content-type")
            .send()
            .await?;

        assert!(response.status().is_success());
        let headers = response.headers();
        assert_eq!(headers.get("access-control-allow-origin").and_then(|v| v.to_str().ok()), Some("*"));
        assert_eq!(headers.get("access-control-max-age").and_then(|v| v.to_str().ok()), Some("3600"));
        Ok(())
    }

    #[tokio::test]
    async fn test_import_requires_token() -> Result<()> {
        let (base, store) = spawn_server("[]").await?;
        let response = reqwest::Client::new()
            .post(format!("{}/importSchedule", base))
            .json(&json!({ "fileData": "aGVsbG8=", "endDate": "2025-06-30" }))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await?;
        assert!(body["error"].is_string());
        assert_eq!(store.commit_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_on_cold_instance() -> Result<()> {
        // Nothing is preloaded, so any resource initialization would be attempted first
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.google.project_id = Some("agenda-test".to_string());
        let app = router(Arc::new(AppState::new(Resources::new(config)?)?));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = reqwest::Client::new();
        for authorization in [None, Some("Basic dXNlcg=="), Some("Bearer ")] {
            let mut request = client
                .post(format!("http://{}/importSchedule", addr))
                .json(&json!({ "fileData": "aGVsbG8=", "endDate": "2025-06-30" }));
            if let Some(value) = authorization {
                request = request.header("Authorization", value);
            }
            let response = request.send().await?;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "header {:?}", authorization);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_import_returns_summary() -> Result<()> {
        let (base, _) = spawn_server(
            r#"[{"materia":"Calculo I","diaSemana":"lunes","horaInicio":"09:00","horaFin":"08:00"}]"#,
        )
        .await?;
        let response = reqwest::Client::new()
            .post(format!("{}/importSchedule", base))
            .bearer_auth("good")
            .json(&json!({ "fileData": "aGVsbG8=", "endDate": "2025-06-30" }))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await?;
        assert_eq!(body["skippedEntries"], 1);
        assert_eq!(body["eventsCreated"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_import_rejects_bad_end_date() -> Result<()> {
        let (base, _) = spawn_server("[]").await?;
        let response = reqwest::Client::new()
            .post(format!("{}/importSchedule", base))
            .bearer_auth("good")
            .json(&json!({ "fileData": "aGVsbG8=", "endDate": "next friday" }))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_predict_profile() -> Result<()> {
        let (base, _) = spawn_server("[]").await?;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/predictStudentProfile", base))
            .json(&json!({ "data": { "motivacion": "8" } }))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await?;
        assert_eq!(body["cluster"], 1);

        let response = client
            .post(format!("{}/predictStudentProfile", base))
            .json(&json!({ "data": { "horasSueno": 8 } }))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await?;
        assert_eq!(body["error"], "Missing form fields: motivation_level");
        Ok(())
    }
}

//! Process-wide handles for expensive collaborators.
//
// Each handle is built on first use and then shared by every request. A failed
// initialization is not remembered, so the next caller tries again.

use crate::auth::{FirebaseTokenVerifier, TokenVerifier};
use crate::config::{Config, StoreBackend};
use crate::extraction::ScheduleExtractor;
use crate::extraction::gemini::GeminiExtractor;
use crate::gcp::{self, AccessTokenProvider};
use crate::profile::model::ArtifactSource;
use crate::profile::{ProfileClassifier, RiskScorer};
use crate::store::{DocumentStore, FirestoreStore, MemoryStore};
use anyhow::{Context, Result, anyhow};
use log::{error, info};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

pub struct LazyResource<T> {
    name: &'static str,
    cell: OnceCell<T>,
}

impl<T> LazyResource<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, cell: OnceCell::new() }
    }

    /// Handle that is already initialized, mostly for tests and local mode
    pub fn ready(name: &'static str, value: T) -> Self {
        Self { name, cell: OnceCell::new_with(Some(value)) }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Return the value, running `init` if nobody has succeeded yet.
    /// Concurrent callers wait for the same in-flight initialization.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = self.name;
        self.cell
            .get_or_try_init(|| async move {
                info!("Initializing {}", name);
                match init().await {
                    Ok(value) => {
                        info!("{} ready", name);
                        Ok(value)
                    }
                    Err(e) => {
                        error!("Failed to initialize {}: {:#}", name, e);
                        Err(e)
                    }
                }
            })
            .await
    }
}

/// Every lazily built collaborator the handlers and the risk job need
pub struct Resources {
    config: Config,
    http: Client,
    tokens: Arc<AccessTokenProvider>,
    project_id: LazyResource<String>,
    store: LazyResource<Arc<dyn DocumentStore>>,
    verifier: LazyResource<Arc<dyn TokenVerifier>>,
    extractor: LazyResource<Arc<dyn ScheduleExtractor>>,
    classifier: LazyResource<Arc<ProfileClassifier>>,
    risk_scorer: LazyResource<Arc<RiskScorer>>,
}

impl Resources {
    pub fn new(config: Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.server.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let tokens = Arc::new(AccessTokenProvider::new(http.clone()));

        let store: LazyResource<Arc<dyn DocumentStore>> = match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory document store");
                let memory: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
                LazyResource::ready("document store", memory)
            }
            StoreBackend::Firestore => LazyResource::new("document store"),
        };

        Ok(Self {
            config,
            http,
            tokens,
            project_id: LazyResource::new("project id"),
            store,
            verifier: LazyResource::new("token verifier"),
            extractor: LazyResource::new("schedule extractor"),
            classifier: LazyResource::new("profile classifier"),
            risk_scorer: LazyResource::new("risk scorer"),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = LazyResource::ready("document store", store);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = LazyResource::ready("token verifier", verifier);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ScheduleExtractor>) -> Self {
        self.extractor = LazyResource::ready("schedule extractor", extractor);
        self
    }

    pub fn with_classifier(mut self, classifier: ProfileClassifier) -> Self {
        self.classifier = LazyResource::ready("profile classifier", Arc::new(classifier));
        self
    }

    pub fn with_risk_scorer(mut self, scorer: RiskScorer) -> Self {
        self.risk_scorer = LazyResource::ready("risk scorer", Arc::new(scorer));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn project_id(&self) -> Result<String> {
        let project = self
            .project_id
            .get_or_init(|| async {
                match &self.config.google.project_id {
                    Some(project) => Ok(project.clone()),
                    None => gcp::discover_project_id(&self.http).await,
                }
            })
            .await?;
        Ok(project.clone())
    }

    pub async fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        let store = self
            .store
            .get_or_init(|| async {
                let project = self.project_id().await?;
                let store: Arc<dyn DocumentStore> = Arc::new(FirestoreStore::new(
                    self.http.clone(),
                    self.tokens.clone(),
                    &project,
                    &self.config.google.database,
                ));
                Ok(store)
            })
            .await?;
        Ok(store.clone())
    }

    pub async fn verifier(&self) -> Result<Arc<dyn TokenVerifier>> {
        let verifier = self
            .verifier
            .get_or_init(|| async {
                let api_key = crate::env_manager::secret_env_var("FIREBASE_WEB_API_KEY")
                    .ok_or_else(|| anyhow!("FIREBASE_WEB_API_KEY is not set"))?;
                let verifier: Arc<dyn TokenVerifier> = Arc::new(FirebaseTokenVerifier::new(
                    self.http.clone(),
                    &self.config.google.identity_endpoint,
                    api_key,
                ));
                Ok(verifier)
            })
            .await?;
        Ok(verifier.clone())
    }

    pub async fn extractor(&self) -> Result<Arc<dyn ScheduleExtractor>> {
        let extractor = self
            .extractor
            .get_or_init(|| async {
                let project = self.project_id().await?;
                let extractor: Arc<dyn ScheduleExtractor> = Arc::new(GeminiExtractor::new(
                    self.http.clone(),
                    self.tokens.clone(),
                    &project,
                    &self.config.google,
                    &self.config.import,
                ));
                Ok(extractor)
            })
            .await?;
        Ok(extractor.clone())
    }

    pub async fn classifier(&self) -> Result<Arc<ProfileClassifier>> {
        let classifier = self
            .classifier
            .get_or_init(|| async {
                let models = &self.config.models;
                let source = self.artifact_source();
                let preprocessor = source.preprocessor(&models.kmeans_preprocessor).await?;
                let model = source.kmeans(&models.kmeans_model).await?;
                Ok(Arc::new(ProfileClassifier::new(preprocessor, model)))
            })
            .await?;
        Ok(classifier.clone())
    }

    pub async fn risk_scorer(&self) -> Result<Arc<RiskScorer>> {
        let scorer = self
            .risk_scorer
            .get_or_init(|| async {
                let models = &self.config.models;
                let source = self.artifact_source();
                let preprocessor = source.preprocessor(&models.regression_preprocessor).await?;
                let model = source.logistic(&models.regression_model).await?;
                Ok(Arc::new(RiskScorer::new(preprocessor, model)))
            })
            .await?;
        Ok(scorer.clone())
    }

    fn artifact_source(&self) -> ArtifactSource<'_> {
        ArtifactSource::new(&self.http, &self.tokens, &self.config.models)
    }
}

//! Student profile models: behavioural cluster and academic risk.

pub mod features;
pub mod model;

pub use features::{FeatureRow, FeatureValue, MissingFeatures, translate_form};

use log::{debug, info};
use model::{KMeansModel, LogisticModel, Preprocessor};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    MissingFeatures(#[from] MissingFeatures),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidFeature { name: String, reason: String },
    #[error("Model error: {0}")]
    Model(String),
}

/// Questionnaire answers from a `{"data": {...}}` request body
pub fn parse_profile_request(body: &[u8]) -> Result<Map<String, Value>, ProfileError> {
    let request: Value = serde_json::from_slice(body)
        .map_err(|_| ProfileError::BadRequest("Request must be JSON.".to_string()))?;
    match request.get("data") {
        Some(Value::Object(data)) => Ok(data.clone()),
        _ => Err(ProfileError::BadRequest(
            "Missing 'data' field or it is not a JSON object.".to_string(),
        )),
    }
}

pub struct ProfileClassifier {
    preprocessor: Preprocessor,
    model: KMeansModel,
}

impl ProfileClassifier {
    pub fn new(preprocessor: Preprocessor, model: KMeansModel) -> Self {
        Self { preprocessor, model }
    }

    /// Cluster index for a set of questionnaire answers
    pub fn classify(&self, form: &Map<String, Value>) -> Result<usize, ProfileError> {
        let row = translate_form(form);
        if row.is_empty() {
            return Err(ProfileError::BadRequest("No usable form data.".to_string()));
        }

        let values = row.select(&self.preprocessor.feature_names())?;
        let transformed = self.preprocessor.transform(&values)?;
        let cluster = self.model.predict(&transformed)?;
        info!("Predicted cluster {}", cluster);
        Ok(cluster)
    }
}

pub struct RiskScorer {
    preprocessor: Preprocessor,
    model: LogisticModel,
}

impl RiskScorer {
    pub fn new(preprocessor: Preprocessor, model: LogisticModel) -> Self {
        Self { preprocessor, model }
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.preprocessor.feature_names()
    }

    /// Probability of the first class of the regression model, read as risk
    pub fn score(&self, row: &FeatureRow) -> Result<f64, ProfileError> {
        let values = row.select(&self.preprocessor.feature_names())?;
        let transformed = self.preprocessor.transform(&values)?;
        let [risk, _] = self.model.predict_proba(&transformed)?;
        debug!("Risk probability {:.2}", risk);
        Ok(risk)
    }
}

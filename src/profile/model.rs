//! Trained model artifacts and their inference.
//
// Artifacts are JSON documents exported from the training pipeline and kept in
// a storage bucket. Downloads are cached on local disk so a warm instance never
// fetches the same file twice.

use super::ProfileError;
use super::features::FeatureValue;
use crate::config::ModelsConfig;
use crate::gcp::{self, AccessTokenProvider};
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeatureSpec {
    /// Standardized as `(x - mean) / scale`
    Numeric { name: String, mean: f64, scale: f64 },
    /// One-hot encoded; unknown categories encode as all zeros
    Categorical { name: String, categories: Vec<String> },
}

impl FeatureSpec {
    pub fn name(&self) -> &str {
        match self {
            FeatureSpec::Numeric { name, .. } | FeatureSpec::Categorical { name, .. } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            FeatureSpec::Numeric { .. } => 1,
            FeatureSpec::Categorical { categories, .. } => categories.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Preprocessor {
    pub features: Vec<FeatureSpec>,
}

impl Preprocessor {
    /// Input columns, in the order `transform` expects them
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn output_width(&self) -> usize {
        self.features.iter().map(FeatureSpec::width).sum()
    }

    pub fn transform(&self, values: &[FeatureValue]) -> Result<Vec<f64>, ProfileError> {
        if values.len() != self.features.len() {
            return Err(ProfileError::Model(format!(
                "Preprocessor expects {} features, got {}",
                self.features.len(),
                values.len()
            )));
        }

        let mut output = Vec::with_capacity(self.output_width());
        for (spec, value) in self.features.iter().zip(values) {
            match spec {
                FeatureSpec::Numeric { name, mean, scale } => {
                    let x = match value {
                        FeatureValue::Number(n) => *n,
                        FeatureValue::Text(text) => {
                            return Err(ProfileError::InvalidFeature {
                                name: name.clone(),
                                reason: format!("expected a number, got '{}'", text),
                            });
                        }
                    };
                    let scale = if *scale == 0.0 { 1.0 } else { *scale };
                    output.push((x - mean) / scale);
                }
                FeatureSpec::Categorical { categories, .. } => {
                    let label = value.as_category();
                    output.extend(categories.iter().map(|c| if *c == label { 1.0 } else { 0.0 }));
                }
            }
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KMeansModel {
    pub centroids: Vec<Vec<f64>>,
}

impl KMeansModel {
    /// Index of the nearest centroid by squared Euclidean distance
    pub fn predict(&self, x: &[f64]) -> Result<usize, ProfileError> {
        let mut best: Option<(usize, f64)> = None;
        for (index, centroid) in self.centroids.iter().enumerate() {
            if centroid.len() != x.len() {
                return Err(ProfileError::Model(format!(
                    "Centroid {} has {} dimensions, input has {}",
                    index,
                    centroid.len(),
                    x.len()
                )));
            }
            let distance: f64 = centroid.iter().zip(x).map(|(c, v)| (c - v).powi(2)).sum();
            match best {
                Some((_, closest)) if closest <= distance => {}
                _ => best = Some((index, distance)),
            }
        }
        best.map(|(index, _)| index)
            .ok_or_else(|| ProfileError::Model("K-means model has no centroids".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    /// Class probabilities `[p(0), p(1)]`
    pub fn predict_proba(&self, x: &[f64]) -> Result<[f64; 2], ProfileError> {
        if self.coefficients.len() != x.len() {
            return Err(ProfileError::Model(format!(
                "Regression model has {} coefficients, input has {}",
                self.coefficients.len(),
                x.len()
            )));
        }
        let z: f64 = self.intercept + self.coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
        let p1 = 1.0 / (1.0 + (-z).exp());
        Ok([1.0 - p1, p1])
    }
}

/// Loads artifacts from the local cache, downloading them on a miss
pub struct ArtifactSource<'a> {
    client: &'a Client,
    tokens: &'a AccessTokenProvider,
    config: &'a ModelsConfig,
}

impl<'a> ArtifactSource<'a> {
    pub fn new(client: &'a Client, tokens: &'a AccessTokenProvider, config: &'a ModelsConfig) -> Self {
        Self { client, tokens, config }
    }

    pub async fn preprocessor(&self, name: &str) -> Result<Preprocessor> {
        self.load_json(name).await
    }

    pub async fn kmeans(&self, name: &str) -> Result<KMeansModel> {
        self.load_json(name).await
    }

    pub async fn logistic(&self, name: &str) -> Result<LogisticModel> {
        self.load_json(name).await
    }

    async fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let bytes = self.fetch(name).await?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse model artifact {}", name))
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let local = self.config.cache_dir.join(name);
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            debug!("Loading {} from {:?}", name, local);
            return tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read cached artifact {:?}", local));
        }

        let bytes = gcp::download_object(self.client, self.tokens, &self.config.bucket, name).await?;
        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .with_context(|| format!("Failed to create {:?}", self.config.cache_dir))?;
        tokio::fs::write(&local, &bytes)
            .await
            .with_context(|| format!("Failed to cache artifact at {:?}", local))?;
        info!("Cached {} at {:?}", name, local);
        Ok(bytes)
    }
}

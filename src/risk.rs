//! Nightly academic-risk analysis.
//
// Scores every onboarded user with the regression model and leaves a single
// unviewed recommendation for those above the threshold.

use crate::profile::{ProfileError, RiskScorer, translate_form};
use crate::store::{self, Document, DocumentStore, FieldFilter, Fields, WriteBatch};
use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;

pub const RISK_ALERT_TYPE: &str = "risk_alert";
pub const RISK_ALERT_TEXT: &str = "He notado que podrías estar en riesgo de no cumplir con tus próximos objetivos. ¿Revisamos tu plan de estudio?";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub processed: usize,
    pub alerts_generated: usize,
    pub skipped: usize,
}

enum UserOutcome {
    NotOnboarded,
    Scored(f64),
}

pub struct RiskAnalyzer {
    store: Arc<dyn DocumentStore>,
    scorer: Arc<RiskScorer>,
    threshold: f64,
}

impl RiskAnalyzer {
    pub fn new(store: Arc<dyn DocumentStore>, scorer: Arc<RiskScorer>, threshold: f64) -> Self {
        Self { store, scorer, threshold }
    }

    pub async fn run(&self) -> Result<RiskReport> {
        info!("Starting nightly risk analysis");
        let users = self.store.list(store::USERS).await.context("Failed to list users")?;

        let mut report = RiskReport::default();
        for user in &users {
            let risk = match self.score_user(user) {
                Ok(UserOutcome::NotOnboarded) => continue,
                Ok(UserOutcome::Scored(risk)) => risk,
                Err(e) => {
                    report.skipped += 1;
                    match e.downcast_ref::<ProfileError>() {
                        Some(ProfileError::MissingFeatures(missing)) => {
                            warn!("Skipping user {}: {}", user.id, missing)
                        }
                        _ => error!("Failed to score user {}: {:#}", user.id, e),
                    }
                    continue;
                }
            };

            info!("User {} - risk probability: {:.2}", user.id, risk);
            report.processed += 1;
            if risk <= self.threshold {
                continue;
            }
            match self.raise_alert(&user.id).await {
                Ok(true) => report.alerts_generated += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to raise risk alert for {}: {:#}", user.id, e),
            }
        }

        info!(
            "Risk analysis finished. Users processed: {}. Alerts generated: {}.",
            report.processed, report.alerts_generated
        );
        Ok(report)
    }

    fn score_user(&self, user: &Document) -> Result<UserOutcome> {
        let onboarded = user.get("onboardingComplete").and_then(|v| v.as_bool()).unwrap_or(false);
        if !onboarded {
            return Ok(UserOutcome::NotOnboarded);
        }
        let Some(answers) = user.get("onboardingData").and_then(|v| v.as_map()) else {
            return Ok(UserOutcome::NotOnboarded);
        };

        let row = translate_form(&store::fields_to_json(answers));
        if row.is_empty() {
            return Err(anyhow!("Onboarding data has no usable answers"));
        }
        Ok(UserOutcome::Scored(self.scorer.score(&row)?))
    }

    /// Write a risk alert unless an unviewed one is already waiting
    async fn raise_alert(&self, user_id: &str) -> Result<bool> {
        let collection = store::user_collection(user_id, store::RECOMMENDATIONS);
        let filters = [FieldFilter::equals("type", RISK_ALERT_TYPE), FieldFilter::equals("viewed", false)];
        if self.store.find_first(&collection, &filters).await?.is_some() {
            debug!("User {} already has an unviewed risk alert", user_id);
            return Ok(false);
        }

        let mut fields = Fields::new();
        fields.insert("text".to_string(), RISK_ALERT_TEXT.into());
        fields.insert("type".to_string(), RISK_ALERT_TYPE.into());
        fields.insert("viewed".to_string(), false.into());

        let mut batch = WriteBatch::new();
        batch.create_with_server_timestamp(&collection, &self.store.new_document_id(), fields, "createdAt");
        self.store
            .commit(batch)
            .await
            .with_context(|| format!("Failed to save risk alert for {}", user_id))?;
        warn!("Risk alert generated for {}", user_id);
        Ok(true)
    }
}

//! Caller identity for the HTTP handlers.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

/// Turns an identity token into the id of the user it was issued to
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
/// The scheme is matched case-insensitively.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
}

/// Verifies Firebase ID tokens through the Identity Toolkit lookup endpoint
pub struct FirebaseTokenVerifier {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl FirebaseTokenVerifier {
    pub fn new(client: Client, endpoint: &str, api_key: SecretString) -> Self {
        Self { client, endpoint: endpoint.to_string(), api_key }
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&json!({ "idToken": token }))
            .send()
            .await
            .context("Failed to reach identity service")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Identity lookup rejected token: {} {}", status, body);
            return Err(anyhow!("Token rejected by identity service ({})", status));
        }

        let lookup: LookupResponse =
            response.json().await.context("Failed to parse identity lookup response")?;
        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Identity service returned no user for token"))?;
        debug!("Verified token for user {}", user.local_id);
        Ok(user.local_id)
    }
}

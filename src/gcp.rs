//! Google Cloud plumbing shared by the store, storage and vision clients.
//
// Access tokens come from `GOOGLE_OAUTH_ACCESS_TOKEN` when set (local runs),
// otherwise from the metadata server of the runtime's service account.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_PROJECT_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/project-id";
const STORAGE_BASE_URL: &str = "https://storage.googleapis.com/storage/v1";

// Refresh tokens this long before they actually expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

pub struct AccessTokenProvider {
    client: Client,
    static_token: Option<SecretString>,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    pub fn new(client: Client) -> Self {
        let static_token = crate::env_manager::secret_env_var("GOOGLE_OAUTH_ACCESS_TOKEN");
        if static_token.is_some() {
            info!("Using access token from GOOGLE_OAUTH_ACCESS_TOKEN");
        }
        Self { client, static_token, cached: Mutex::new(None) }
    }

    pub fn with_static_token(client: Client, token: SecretString) -> Self {
        Self { client, static_token: Some(token), cached: Mutex::new(None) }
    }

    /// Bearer token for Google APIs, refreshed shortly before expiry
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.expose_secret().to_string());
        }

        // Held across the refresh so concurrent callers share one metadata request
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if current.expires_at > Utc::now() {
                return Ok(current.token.expose_secret().to_string());
            }
        }

        debug!("Fetching access token from metadata server");
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to reach metadata server")?;

        if !response.status().is_success() {
            return Err(anyhow!("Metadata token request failed: {}", response.status()));
        }

        let token: MetadataToken =
            response.json().await.context("Failed to parse metadata token response")?;
        let lifetime = (token.expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0);
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            token: SecretString::from(token.access_token),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        });
        Ok(value)
    }
}

/// Project id of the runtime, as reported by the metadata server
pub async fn discover_project_id(client: &Client) -> Result<String> {
    let response = client
        .get(METADATA_PROJECT_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context("Failed to reach metadata server")?;

    if !response.status().is_success() {
        return Err(anyhow!("Project id lookup failed: {}", response.status()));
    }

    let project = response.text().await?.trim().to_string();
    if project.is_empty() {
        return Err(anyhow!("Metadata server returned an empty project id"));
    }
    Ok(project)
}

/// Download one object from Cloud Storage
pub async fn download_object(
    client: &Client,
    tokens: &AccessTokenProvider,
    bucket: &str,
    object: &str,
) -> Result<Vec<u8>> {
    info!("Downloading gs://{}/{}", bucket, object);
    let url = object_url(bucket, object)?;
    let token = tokens.access_token().await?;

    let response = client
        .get(url)
        .query(&[("alt", "media")])
        .bearer_auth(token)
        .send()
        .await
        .with_context(|| format!("Failed to download gs://{}/{}", bucket, object))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Download of gs://{}/{} failed with {}: {}", bucket, object, status, body));
    }

    Ok(response.bytes().await?.to_vec())
}

/// JSON API URL of an object; the whole name is one encoded path segment
fn object_url(bucket: &str, object: &str) -> Result<Url> {
    let mut url = Url::parse(STORAGE_BASE_URL).context("Invalid storage base URL")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Storage base URL cannot have path segments"))?
        .extend(["b", bucket, "o", object]);
    Ok(url)
}

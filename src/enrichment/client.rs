use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::models::CheckResponse;
use crate::github::ApiError;

/// The enrichment collaborator.
///
/// `subject_timestamp` is normally the PR's `updated_at`; callers pass the
/// current time instead when they need to defeat the service's own cache.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn check(
        &self,
        url: &str,
        viewer: &str,
        subject_timestamp: DateTime<Utc>,
    ) -> Result<CheckResponse, ApiError>;
}

#[derive(Clone)]
pub struct TurnClient {
    client: Client,
    base_url: String,
    token: String,
}

impl TurnClient {
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        if !base_url.starts_with("https://") {
            anyhow::bail!("Enrichment API URL must use HTTPS: {}", base_url);
        }
        let client = Client::builder()
            .user_agent("ghblock")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl Enricher for TurnClient {
    async fn check(
        &self,
        url: &str,
        viewer: &str,
        subject_timestamp: DateTime<Utc>,
    ) -> Result<CheckResponse, ApiError> {
        let body = json!({
            "url": url,
            "user": viewer,
            "updated_at": subject_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        });

        let resp = self
            .client
            .post(format!("{}/v1/validate", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::network("Enrichment API request failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), false, &text));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::network("Failed to read enrichment response", e))?;
        let data: CheckResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::decode("Failed to parse enrichment response", &e))?;

        debug!(
            url = url,
            state = %data.pull_request.state,
            test_state = %data.pull_request.test_state,
            pending_checks = data.pending_checks(),
            "Enrichment API call successful"
        );
        Ok(data)
    }
}

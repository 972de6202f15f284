//! Authenticated JSON client for the wiki REST API.
//!
//! [`JsonApi`] is the seam between connectors and the network: the pagination
//! engine and the entity transforms only ever see this trait, so tests can
//! point a real [`WikiApiClient`] at a mock server or substitute a fake.
//!
//! # Authentication
//!
//! Every request carries `Authorization: Token <token_id>:<token_secret>`.
//! API endpoints live under `<base_url>/api/`; human-facing links are built
//! relative to `<base_url>/` by [`JsonApi::build_app_url`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;

/// Query parameters as ordered key/value pairs.
pub type Params = Vec<(String, String)>;

/// Minimal JSON GET interface used by connectors.
#[async_trait]
pub trait JsonApi: Send + Sync {
    /// GET `endpoint` with query `params` and decode the JSON body.
    async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value, ApiError>;

    /// Absolute link to a page in the source's web UI.
    fn build_app_url(&self, path: &str) -> String;
}

/// reqwest-backed client for the wiki API.
///
/// Owns its own connection pool; dropping the client releases it.
pub struct WikiApiClient {
    client: Client,
    base_url: String,
    token_id: String,
    token_secret: String,
}

impl WikiApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token_id: impl Into<String>,
        token_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("docsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_id: token_id.into(),
            token_secret: token_secret.into(),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl JsonApi for WikiApiClient {
    async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let url = self.api_url(endpoint);
        debug!(%url, ?params, "GET");

        let resp = self
            .client
            .get(&url)
            .query(params)
            .header(
                "Authorization",
                format!("Token {}:{}", self.token_id, self.token_secret),
            )
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::RequestFailed {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let text = resp.text().await.map_err(|source| ApiError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| ApiError::malformed(endpoint, e.to_string()))
    }

    fn build_app_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

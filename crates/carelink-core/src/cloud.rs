//! HTTP client for the blood-pressure cloud endpoint.
//!
//! Readings are posted as JSON with RFC 3339 timestamps, one at a time to
//! `{endpoint}/blood-pressure` or as an array to
//! `{endpoint}/blood-pressure/batch`. When an API key is configured it is
//! sent as a bearer token.
//!
//! # Example
//!
//! ```no_run
//! use carelink_core::cloud::HttpCloudSync;
//! use carelink_core::CloudSync;
//! use carelink_types::{Reading, ReadingSource};
//!
//! # async fn example() -> carelink_core::Result<()> {
//! let cloud = HttpCloudSync::new("https://health.example.com/api", Some("secret".into()))?;
//! if cloud.is_reachable().await {
//!     cloud.upload(&Reading::new(120, 80, 72, ReadingSource::Bluetooth)).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info};

use carelink_types::Reading;

use crate::error::{Error, Result};
use crate::traits::CloudSync;

/// Timeout for upload requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the health probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// [`CloudSync`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpCloudSync {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCloudSync {
    /// Create a client for `endpoint`, e.g. `https://host/api`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] unless the endpoint is an http(s) URL.
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Cloud(e.to_string()))?;
        Self::with_client(endpoint, api_key, client)
    }

    /// Create a client with a custom reqwest [`Client`].
    pub fn with_client(endpoint: &str, api_key: Option<String>, client: Client) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::invalid_config(format!(
                "endpoint must start with http:// or https://, got: {endpoint}"
            )));
        }
        let api_key = api_key.filter(|key| !key.is_empty());
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// The normalized endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns true if the health probe succeeds.
    pub async fn is_reachable(&self) -> bool {
        self.health().await.is_ok()
    }

    /// Probe `{endpoint}/health`.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.endpoint);
        let request = self.client.get(&url).timeout(HEALTH_TIMEOUT);
        self.send(request, &url).await?;
        Ok(())
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| Error::Cloud(format!("{url} not reachable: {e}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());
            Err(Error::Cloud(format!("server error {}: {message}", status.as_u16())))
        }
    }
}

#[async_trait]
impl CloudSync for HttpCloudSync {
    async fn upload(&self, reading: &Reading) -> Result<()> {
        let url = format!("{}/blood-pressure", self.endpoint);
        debug!(id = %reading.id, %url, "uploading reading");
        self.send(self.client.post(&url).json(reading), &url).await?;
        Ok(())
    }

    async fn upload_batch(&self, readings: &[Reading]) -> Result<()> {
        if readings.is_empty() {
            return Ok(());
        }
        let url = format!("{}/blood-pressure/batch", self.endpoint);
        self.send(self.client.post(&url).json(readings), &url).await?;
        info!(count = readings.len(), "batch uploaded");
        Ok(())
    }
}

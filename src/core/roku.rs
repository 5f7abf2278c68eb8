//! Roku External Control Protocol client.
//!
//! ECP is plain HTTP on port 8060 of the device: `POST /launch/{channel}`
//! with deep-link query params, `POST /keypress/{key}`, and `GET /query/*`
//! endpoints returning XML.

use std::time::Duration;

use serde::Serialize;

pub const ECP_PORT: u16 = 8060;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// ECP request failure.
#[derive(Debug, thiserror::Error)]
pub enum RokuError {
    #[error("Roku connection failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Roku returned status {status}")]
    Status { status: u16 },
}

/// Outcome of a launch request, serialized into tool results.
#[derive(Debug, Serialize)]
pub struct LaunchResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// HTTP client for one Roku device.
#[derive(Debug, Clone)]
pub struct RokuClient {
    http: reqwest::Client,
    base_url: String,
}

impl RokuClient {
    /// Create a client for the device at the given IP.
    pub fn new(ip: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{ip}:{ECP_PORT}"),
        }
    }

    /// Create a client against an explicit base URL (tests, proxies).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn check(status: reqwest::StatusCode) -> Result<(), RokuError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(RokuError::Status {
                status: status.as_u16(),
            })
        }
    }

    /// Launch a channel with deep-link content params.
    pub async fn launch(
        &self,
        channel_id: u32,
        content_id: &str,
        media_type: &str,
    ) -> Result<LaunchResult, RokuError> {
        let url = format!("{}/launch/{channel_id}", self.base_url);
        tracing::info!(%url, content_id, media_type, "launching on Roku");
        let response = self
            .http
            .post(&url)
            .query(&[("contentId", content_id), ("mediaType", media_type)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::check(response.status())?;
        Ok(LaunchResult {
            success: true,
            message: format!("Launched channel {channel_id} with content ID {content_id}."),
            status_code: Some(response.status().as_u16()),
        })
    }

    /// Press a remote key.
    pub async fn keypress(&self, key: &str) -> Result<(), RokuError> {
        let url = format!("{}/keypress/{key}", self.base_url);
        tracing::debug!(%url, "sending keypress");
        let response = self.http.post(&url).timeout(REQUEST_TIMEOUT).send().await?;
        Self::check(response.status())
    }

    /// Fetch the device-info XML document.
    pub async fn device_info(&self) -> Result<String, RokuError> {
        self.query("device-info").await
    }

    /// Fetch the active-app XML document.
    pub async fn active_app(&self) -> Result<String, RokuError> {
        self.query("active-app").await
    }

    async fn query(&self, endpoint: &str) -> Result<String, RokuError> {
        let url = format!("{}/query/{endpoint}", self.base_url);
        let response = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        Self::check(response.status())?;
        Ok(response.text().await?)
    }
}

//! Upload credentials issued by the backend.
//!
//! A credential is a signed, time-limited URL that authorizes one PUT against
//! object storage, together with the identifiers the backend assigned to the
//! artifact. The backend endpoint is an external collaborator; this module only
//! knows its request and response shapes.

use crate::config::ApiConfig;
use crate::error::UploadError;
use crate::request::UploadRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Body sent to the credential endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub content_type: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<String>,
}

impl CredentialRequest {
    pub fn for_upload(request: &UploadRequest, file_size: u64) -> Self {
        let metadata = request.metadata();
        Self {
            content_type: request.content_type().to_string(),
            file_size,
            duration: metadata.duration_secs,
            frame_rate: metadata.frame_rate,
            angle: metadata.angle.clone(),
        }
    }
}

/// Response returned by the credential endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub upload_url: String,
    pub storage_key: String,
    pub video_id: String,
    /// Validity window in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// A write-capable URL plus the identity of the artifact it will create
#[derive(Debug, Clone)]
pub struct UploadCredential {
    pub upload_url: String,
    pub storage_key: String,
    pub video_id: String,
    /// Wall-clock issuance time, for reporting
    pub issued_at: DateTime<Utc>,
    /// Validity window granted by the endpoint
    pub valid_for: Duration,
    expires_at: Instant,
}

impl UploadCredential {
    /// Create a credential whose validity window starts now
    pub fn new(
        upload_url: impl Into<String>,
        storage_key: impl Into<String>,
        video_id: impl Into<String>,
        valid_for: Duration,
    ) -> Self {
        Self {
            upload_url: upload_url.into(),
            storage_key: storage_key.into(),
            video_id: video_id.into(),
            issued_at: Utc::now(),
            valid_for,
            expires_at: Instant::now() + valid_for,
        }
    }

    /// Local deadline after which the URL must not be used
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Time left before the local deadline
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Whether a transfer may still start, keeping `margin` in reserve
    pub fn is_usable(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

impl From<CredentialResponse> for UploadCredential {
    fn from(response: CredentialResponse) -> Self {
        Self::new(
            response.upload_url,
            response.storage_key,
            response.video_id,
            Duration::from_secs(response.expires_in),
        )
    }
}

/// Source of upload credentials
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Request a fresh credential for the described upload.
    ///
    /// Authentication failures must be reported as
    /// [`UploadError::Unauthenticated`] so they are not retried.
    async fn issue(&self, request: &CredentialRequest) -> Result<UploadCredential, UploadError>;
}

/// Credential issuer backed by the platform's REST API
pub struct HttpCredentialIssuer {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpCredentialIssuer {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            bearer_token: None,
        }
    }

    /// Create an issuer from API configuration
    pub fn from_config(config: &ApiConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let issuer = Self::new(client, config.endpoint_url());
        Ok(match &config.auth_token {
            Some(token) => issuer.with_bearer_token(token.clone()),
            None => issuer,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, file_size = request.file_size))]
    async fn issue(&self, request: &CredentialRequest) -> Result<UploadCredential, UploadError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(ref token) = self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UploadError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UploadError::Unauthenticated {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::CredentialRequestFailed {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let parsed: CredentialResponse =
            response
                .json()
                .await
                .map_err(|e| UploadError::CredentialRequestFailed {
                    status: None,
                    message: format!("Invalid credential response: {}", e),
                })?;

        debug!(
            video_id = %parsed.video_id,
            storage_key = %parsed.storage_key,
            expires_in = parsed.expires_in,
            "Upload credential issued"
        );

        Ok(parsed.into())
    }
}

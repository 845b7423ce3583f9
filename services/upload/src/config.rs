use crate::retry::{check_multiplier, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors found while validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main configuration for the upload client
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Credential endpoint configuration
    pub api: ApiConfig,
    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port; metrics are not exported when unset
    pub metrics_port: Option<u16>,
}

/// Credential-issuing endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Backend base URL, e.g. https://api.courtside.app
    pub base_url: String,
    /// Path of the upload URL endpoint
    #[serde(default = "default_upload_url_path")]
    pub upload_url_path: String,
    /// Bearer token sent with credential requests
    pub auth_token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Factor applied to the delay after each retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Byte transfer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Read buffer size used when streaming the file (256KB default)
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Transfer timeout in seconds; none by default
    pub timeout_secs: Option<u64>,
    /// Storage response statuses that must not be retried (e.g. 403 for a rejected signature)
    #[serde(default)]
    pub permanent_statuses: Vec<u16>,
    /// Credentials closer than this to expiry are not used
    #[serde(default = "default_credential_expiry_margin_secs")]
    pub credential_expiry_margin_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "courtside-upload".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_upload_url_path() -> String {
    "/api/videos/upload-url".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    256 * 1024 // 256KB
}

fn default_credential_expiry_margin_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/upload").required(false))
            .add_source(config::File::with_name("/etc/courtside/upload").required(false))
            // Override with environment variables
            // UPLOAD__API__BASE_URL -> api.base_url
            .add_source(
                config::Environment::with_prefix("UPLOAD")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::from_builder(builder)
    }

    /// Deserialize and validate configuration from a prepared builder
    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("api.base_url".to_string()));
        }

        check_multiplier(self.retry.backoff_multiplier)?;

        if self.transfer.chunk_size_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transfer.chunk_size_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if let Some(status) = self
            .transfer
            .permanent_statuses
            .iter()
            .find(|s| (200..300).contains(*s))
        {
            return Err(ConfigError::InvalidValue {
                field: "transfer.permanent_statuses".to_string(),
                message: format!("{} is a success status", status),
            });
        }

        Ok(())
    }

    /// Build the retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.retry, &self.transfer)
    }

    /// Get the credential expiry margin as Duration
    pub fn credential_expiry_margin(&self) -> Duration {
        Duration::from_secs(self.transfer.credential_expiry_margin_secs)
    }
}

impl ApiConfig {
    /// Full URL of the credential endpoint
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.upload_url_path.trim_start_matches('/')
        )
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TransferConfig {
    /// Get transfer timeout as Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            timeout_secs: None,
            permanent_statuses: Vec::new(),
            credential_expiry_margin_secs: default_credential_expiry_margin_secs(),
        }
    }
}

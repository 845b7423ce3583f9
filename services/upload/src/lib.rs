//! Courtside Upload
//!
//! Resilient video upload client for the Courtside basketball training
//! platform. Recorded shot and drill clips are uploaded straight to object
//! storage through short-lived signed URLs issued by the backend.
//!
//! ## Features
//!
//! - **Two-phase transfer**: request an upload credential, then stream the
//!   file to the signed URL with a single PUT
//! - **Bounded retries**: exponential backoff for transient failures, with
//!   authentication errors, missing files and cancellation treated as final
//! - **Cancellation**: any in-flight upload can be cancelled by id, and an
//!   optional overall deadline behaves the same way
//! - **Progress events**: typed events for state changes, progress, failed
//!   attempts and success
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────────┐
//!                       │ ActiveUpload     │
//!                cancel │ Registry         │
//!             ┌────────▶│ id → token       │
//!             │         └──────────────────┘
//!             │                  │
//!      ┌──────────────┐          ▼
//!      │ Caller       │   ┌──────────────────┐      ┌──────────────┐
//!      │              │──▶│ Upload           │─────▶│ Credential   │
//!      │              │   │ Orchestrator     │      │ Endpoint     │
//!      └──────────────┘   │  retry/backoff   │      └──────────────┘
//!             ▲           └──────────────────┘
//!             │ events             │               ┌──────────────┐
//!             └────────────────────┴──────────────▶│ Object       │
//!                                         PUT      │ Storage      │
//!                                                  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use courtside_upload::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let orchestrator = UploadOrchestrator::new(
//!         Arc::new(HttpCredentialIssuer::from_config(&config.api)?),
//!         Arc::new(HttpTransport::from_config(&config.transfer)?),
//!         Arc::new(ActiveUploadRegistry::new()),
//!     )
//!     .with_policy(config.retry_policy());
//!
//!     let request = UploadRequest::from_path("clips/free-throw.mp4").with_angle("side");
//!     let handle = orchestrator.start(request, Arc::new(NoopObserver))?;
//!     let outcome = handle.join().await?;
//!     println!("uploaded {}", outcome.video_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod retry;
pub mod transport;

pub use config::{ApiConfig, Config, ConfigError, RetryConfig, ServiceConfig, TransferConfig};
pub use credentials::{
    CredentialIssuer, CredentialRequest, CredentialResponse, HttpCredentialIssuer,
    UploadCredential,
};
pub use error::UploadError;
pub use events::{ChannelObserver, NoopObserver, UploadEvent, UploadObserver, UploadState};
pub use orchestrator::{UploadHandle, UploadOrchestrator, UploadOutcome};
pub use registry::{ActiveUploadRegistry, Registration, UploadId};
pub use request::{content_type_for_path, CaptureMetadata, UploadRequest};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, ProgressFn, TransferRequest, Transport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::credentials::{CredentialIssuer, HttpCredentialIssuer};
    pub use crate::error::UploadError;
    pub use crate::events::{ChannelObserver, NoopObserver, UploadEvent, UploadObserver};
    pub use crate::orchestrator::{UploadHandle, UploadOrchestrator, UploadOutcome};
    pub use crate::registry::{ActiveUploadRegistry, UploadId};
    pub use crate::request::UploadRequest;
    pub use crate::retry::RetryPolicy;
    pub use crate::transport::{HttpTransport, Transport};
}

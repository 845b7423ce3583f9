//! Byte transfer to a signed URL.

use crate::config::TransferConfig;
use crate::error::UploadError;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

/// Progress callback invoked with `(bytes_sent, total_bytes)`
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One PUT of a local file to a destination URL
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub url: &'a str,
    pub content_type: &'a str,
    pub path: &'a Path,
    pub total_bytes: u64,
}

/// Moves the bytes of a local file to object storage.
///
/// Implementations return the final HTTP status; any status is a valid
/// return. Errors are reserved for failures that produced no status at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn put(&self, request: TransferRequest<'_>, progress: ProgressFn)
        -> Result<u16, UploadError>;
}

/// Single-shot streaming PUT over HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, chunk_size: usize) -> Self {
        Self { client, chunk_size }
    }

    /// Create a transport from transfer configuration
    pub fn from_config(config: &TransferConfig) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self::new(builder.build()?, config.chunk_size_bytes))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request, progress), fields(path = %request.path.display(), total_bytes = request.total_bytes))]
    async fn put(
        &self,
        request: TransferRequest<'_>,
        progress: ProgressFn,
    ) -> Result<u16, UploadError> {
        let file = tokio::fs::File::open(request.path)
            .await
            .map_err(|e| UploadError::from_io(request.path, &e))?;

        let total = request.total_bytes;
        let mut sent = 0u64;
        let on_chunk = progress.clone();
        let stream = ReaderStream::with_capacity(file, self.chunk_size).inspect_ok(move |chunk| {
            sent += chunk.len() as u64;
            on_chunk(sent, total);
        });

        let response = self
            .client
            .put(request.url)
            .header(CONTENT_TYPE, request.content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| UploadError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        debug!(status = status, "Transfer finished");

        // An empty body yields no chunks, so completion is reported here
        if total == 0 && response.status().is_success() {
            progress(0, 0);
        }

        Ok(status)
    }
}

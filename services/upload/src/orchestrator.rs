//! Upload orchestration.
//!
//! One logical upload runs as a sequence of attempts. Each attempt requests a
//! fresh credential and then streams the file to the credential's URL. Failed
//! attempts are retried with exponential backoff while the policy allows it;
//! cancellation (explicit or by deadline) is checked at the top of every
//! attempt and raced against every suspension point.

use crate::credentials::{CredentialIssuer, CredentialRequest, UploadCredential};
use crate::error::UploadError;
use crate::events::{UploadEvent, UploadObserver, UploadState};
use crate::registry::{ActiveUploadRegistry, Registration, UploadId};
use crate::request::UploadRequest;
use crate::retry::RetryPolicy;
use crate::transport::{ProgressFn, TransferRequest, Transport};
use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub upload_id: UploadId,
    /// Artifact identifier assigned by the backend
    pub video_id: String,
    /// Object storage key the bytes were written to
    pub storage_key: String,
    pub bytes: u64,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub credential_issued_at: DateTime<Utc>,
}

/// Drives video uploads through credential issuance, transfer and retries
#[derive(Clone)]
pub struct UploadOrchestrator {
    issuer: Arc<dyn CredentialIssuer>,
    transport: Arc<dyn Transport>,
    registry: Arc<ActiveUploadRegistry>,
    policy: RetryPolicy,
    expiry_margin: Duration,
}

impl UploadOrchestrator {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        transport: Arc<dyn Transport>,
        registry: Arc<ActiveUploadRegistry>,
    ) -> Self {
        Self {
            issuer,
            transport,
            registry,
            policy: RetryPolicy::default(),
            expiry_margin: Duration::from_secs(5),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Credentials closer than `margin` to their expiry are not used
    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    pub fn registry(&self) -> &Arc<ActiveUploadRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start an upload in the background.
    ///
    /// The upload is registered before this returns, so the handle's id can be
    /// passed to [`cancel`](Self::cancel) right away.
    pub fn start(
        &self,
        request: UploadRequest,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<UploadHandle, UploadError> {
        let registration = self.registry.register(UploadId::new())?;
        let id = registration.id();

        let this = self.clone();
        let task = tokio::spawn(async move { this.run(registration, request, observer).await });

        Ok(UploadHandle {
            id,
            registry: self.registry.clone(),
            task,
        })
    }

    /// Run an upload to completion under a caller-chosen id
    pub async fn upload(
        &self,
        id: UploadId,
        request: UploadRequest,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<UploadOutcome, UploadError> {
        let registration = self.registry.register(id)?;
        self.run(registration, request, observer).await
    }

    /// Request cancellation of an in-flight upload.
    ///
    /// Unknown or finished ids are ignored and `false` is returned.
    pub fn cancel(&self, id: &UploadId) -> bool {
        self.registry.cancel(id)
    }

    #[instrument(
        name = "upload",
        skip_all,
        fields(upload_id = %registration.id(), path = %request.path().display())
    )]
    async fn run(
        &self,
        registration: Registration,
        request: UploadRequest,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<UploadOutcome, UploadError> {
        let reporter = Reporter {
            upload_id: registration.id(),
            observer,
        };
        let scope = CancelScope::new(registration.token().clone(), request.deadline());

        info!(content_type = %request.content_type(), "Starting video upload");

        let started = Instant::now();
        let result = self.drive(&reporter, &request, &scope, started).await;

        // Release before the terminal event so observers see the final registry state
        drop(registration);

        match result {
            Ok(outcome) => {
                metrics::counter!("upload.succeeded").increment(1);
                metrics::counter!("upload.bytes").increment(outcome.bytes);
                metrics::histogram!("upload.duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                info!(
                    video_id = %outcome.video_id,
                    storage_key = %outcome.storage_key,
                    bytes = outcome.bytes,
                    attempts = outcome.attempts,
                    "Video upload completed"
                );

                reporter.state(outcome.attempts, UploadState::Succeeded);
                reporter.emit(UploadEvent::Succeeded {
                    upload_id: reporter.upload_id,
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(Failure { attempt, error }) => {
                metrics::counter!("upload.failed", "reason" => error.kind()).increment(1);

                let state = if error == UploadError::Cancelled {
                    warn!(attempt = attempt, "Video upload cancelled");
                    UploadState::Cancelled
                } else {
                    error!(attempt = attempt, error = %error, "Video upload failed");
                    UploadState::Failed
                };

                reporter.state(attempt, state);
                reporter.emit(UploadEvent::AttemptFailed {
                    upload_id: reporter.upload_id,
                    attempt,
                    error: error.clone(),
                    will_retry: false,
                });
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        reporter: &Reporter,
        request: &UploadRequest,
        scope: &CancelScope,
        started: Instant,
    ) -> Result<UploadOutcome, Failure> {
        reporter.state(0, UploadState::Idle);

        let total_bytes = scope
            .guard(resource_size(request))
            .await
            .map_err(|error| Failure { attempt: 1, error })?;

        let mut backoff = self.policy.backoff();
        let mut attempt = 0u32;

        loop {
            if scope.is_cancelled() {
                return Err(Failure {
                    attempt: attempt.max(1),
                    error: UploadError::Cancelled,
                });
            }

            attempt += 1;
            metrics::counter!("upload.attempts").increment(1);

            let error = match self
                .attempt(reporter, request, scope, attempt, total_bytes)
                .await
            {
                Ok(credential) => {
                    return Ok(UploadOutcome {
                        upload_id: reporter.upload_id,
                        video_id: credential.video_id,
                        storage_key: credential.storage_key,
                        bytes: total_bytes,
                        attempts: attempt,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        credential_issued_at: credential.issued_at,
                    })
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&error, attempt) {
                return Err(Failure { attempt, error });
            }

            let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay);

            warn!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                status = ?error.status(),
                "Upload attempt failed, retrying"
            );
            metrics::counter!("upload.retries").increment(1);

            reporter.state(attempt, UploadState::Failed);
            reporter.emit(UploadEvent::AttemptFailed {
                upload_id: reporter.upload_id,
                attempt,
                error,
                will_retry: true,
            });

            // Observers may cancel from the failure event
            if scope.is_cancelled() {
                return Err(Failure {
                    attempt,
                    error: UploadError::Cancelled,
                });
            }

            tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    return Err(Failure { attempt, error: UploadError::Cancelled });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        reporter: &Reporter,
        request: &UploadRequest,
        scope: &CancelScope,
        attempt: u32,
        total_bytes: u64,
    ) -> Result<UploadCredential, UploadError> {
        reporter.state(attempt, UploadState::RequestingCredential);

        let credential_request = CredentialRequest::for_upload(request, total_bytes);
        let credential = scope
            .guard(self.issuer.issue(&credential_request))
            .await?;

        if !credential.is_usable(self.expiry_margin) {
            debug!(
                video_id = %credential.video_id,
                remaining_ms = credential.remaining().as_millis() as u64,
                "Credential too close to expiry"
            );
            return Err(UploadError::CredentialExpired);
        }

        reporter.state(attempt, UploadState::Transferring);

        let transfer = TransferRequest {
            url: &credential.upload_url,
            content_type: request.content_type(),
            path: request.path(),
            total_bytes,
        };
        let status = scope
            .guard(
                self.transport
                    .put(transfer, reporter.progress_fn(attempt, total_bytes)),
            )
            .await?;

        if !(200..300).contains(&status) {
            return Err(UploadError::TransferFailed { status });
        }

        Ok(credential)
    }
}

/// Size of the file behind the request; fails if it is missing or not a file
async fn resource_size(request: &UploadRequest) -> Result<u64, UploadError> {
    let path = request.path();
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| UploadError::from_io(path, &e))?;

    if !metadata.is_file() {
        return Err(UploadError::ResourceUnreadable {
            path: path.to_path_buf(),
            message: "not a regular file".to_string(),
        });
    }

    Ok(metadata.len())
}

/// Terminal failure together with the attempt it ended on
struct Failure {
    attempt: u32,
    error: UploadError,
}

/// Cancellation token plus an optional overall deadline
struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelScope {
    fn new(token: CancellationToken, deadline: Option<Duration>) -> Self {
        Self {
            token,
            deadline: deadline.map(|d| Instant::now() + d),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Run `fut` unless the scope is cancelled first; the future is dropped on cancellation
    async fn guard<T, F>(&self, fut: F) -> Result<T, UploadError>
    where
        F: Future<Output = Result<T, UploadError>>,
    {
        if self.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(UploadError::Cancelled),
            result = fut => result,
        }
    }
}

struct Reporter {
    upload_id: UploadId,
    observer: Arc<dyn UploadObserver>,
}

impl Reporter {
    fn emit(&self, event: UploadEvent) {
        self.observer.on_event(event);
    }

    fn state(&self, attempt: u32, state: UploadState) {
        debug!(attempt = attempt, state = ?state, "Upload state changed");
        self.emit(UploadEvent::StateChanged {
            upload_id: self.upload_id,
            attempt,
            state,
        });
    }

    /// Progress callback for one attempt. Reported fractions never decrease
    /// and stay within `[0, 1]` regardless of what the transport reports.
    fn progress_fn(&self, attempt: u32, total_bytes: u64) -> ProgressFn {
        let observer = self.observer.clone();
        let upload_id = self.upload_id;
        let high_water = AtomicU64::new(0);

        Arc::new(move |sent: u64, _total: u64| {
            let sent = sent.min(total_bytes);
            if sent < high_water.fetch_max(sent, Ordering::Relaxed) {
                return;
            }

            let fraction = if total_bytes == 0 {
                1.0
            } else {
                sent as f64 / total_bytes as f64
            };

            observer.on_event(UploadEvent::Progress {
                upload_id,
                attempt,
                fraction,
            });
        })
    }
}

/// Handle to an upload started with [`UploadOrchestrator::start`]
pub struct UploadHandle {
    id: UploadId,
    registry: Arc<ActiveUploadRegistry>,
    task: JoinHandle<Result<UploadOutcome, UploadError>>,
}

impl UploadHandle {
    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Request cancellation; see [`UploadOrchestrator::cancel`]
    pub fn cancel(&self) -> bool {
        self.registry.cancel(&self.id)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the upload to finish
    pub async fn join(self) -> Result<UploadOutcome, UploadError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(UploadError::Cancelled),
        }
    }
}

//! Events emitted while an upload runs.
//!
//! Ordering guarantees for a single upload:
//! - every `AttemptFailed` is delivered before the next attempt starts
//! - a failed upload ends with exactly one `AttemptFailed` whose `will_retry` is false
//! - a successful upload ends with exactly one `Succeeded`

use crate::error::UploadError;
use crate::orchestrator::UploadOutcome;
use crate::registry::UploadId;
use serde::Serialize;
use tokio::sync::mpsc;

/// Per-attempt lifecycle of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    RequestingCredential,
    Transferring,
    Succeeded,
    Failed,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Succeeded | UploadState::Failed | UploadState::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    StateChanged {
        upload_id: UploadId,
        attempt: u32,
        state: UploadState,
    },
    /// Fraction of the file sent in the current attempt, in `[0, 1]`
    Progress {
        upload_id: UploadId,
        attempt: u32,
        fraction: f64,
    },
    AttemptFailed {
        upload_id: UploadId,
        attempt: u32,
        error: UploadError,
        will_retry: bool,
    },
    Succeeded {
        upload_id: UploadId,
        outcome: UploadOutcome,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> UploadId {
        match self {
            UploadEvent::StateChanged { upload_id, .. }
            | UploadEvent::Progress { upload_id, .. }
            | UploadEvent::AttemptFailed { upload_id, .. }
            | UploadEvent::Succeeded { upload_id, .. } => *upload_id,
        }
    }
}

/// Receiver of upload events.
///
/// Called inline from the upload task, including from inside the transport's
/// byte stream, so implementations must return quickly.
pub trait UploadObserver: Send + Sync {
    fn on_event(&self, event: UploadEvent);
}

impl<F> UploadObserver for F
where
    F: Fn(UploadEvent) + Send + Sync,
{
    fn on_event(&self, event: UploadEvent) {
        self(event)
    }
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {
    fn on_event(&self, _event: UploadEvent) {}
}

/// Observer that forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl UploadObserver for ChannelObserver {
    fn on_event(&self, event: UploadEvent) {
        // A dropped receiver means nobody is listening any more
        let _ = self.sender.send(event);
    }
}

//! Error taxonomy for video uploads.

use crate::registry::UploadId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while uploading a video.
///
/// The error is `Clone` so the same value can be delivered to observers for
/// every failed attempt and still be returned as the call's final result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UploadError {
    #[error("Resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    #[error("Resource {} is not readable: {message}", .path.display())]
    ResourceUnreadable { path: PathBuf, message: String },

    #[error("Credential endpoint rejected the caller (status {status})")]
    Unauthenticated { status: u16 },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Upload {0} is already in flight")]
    AlreadyActive(UploadId),

    #[error("Transfer failed with status {status}")]
    TransferFailed { status: u16 },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Credential request failed: {message}")]
    CredentialRequestFailed { status: Option<u16>, message: String },

    #[error("Upload credential expired before the transfer started")]
    CredentialExpired,
}

impl UploadError {
    /// Whether repeating the operation can succeed without outside intervention.
    ///
    /// Transfer statuses configured as permanent are handled by
    /// [`RetryPolicy`](crate::retry::RetryPolicy) on top of this.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::TransferFailed { .. }
            | UploadError::NetworkError(_)
            | UploadError::CredentialRequestFailed { .. }
            | UploadError::CredentialExpired => true,
            UploadError::ResourceNotFound(_)
            | UploadError::ResourceUnreadable { .. }
            | UploadError::Unauthenticated { .. }
            | UploadError::Cancelled
            | UploadError::AlreadyActive(_) => false,
        }
    }

    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::ResourceNotFound(_) => "resource_not_found",
            UploadError::ResourceUnreadable { .. } => "resource_unreadable",
            UploadError::Unauthenticated { .. } => "unauthenticated",
            UploadError::Cancelled => "cancelled",
            UploadError::AlreadyActive(_) => "already_active",
            UploadError::TransferFailed { .. } => "transfer_failed",
            UploadError::NetworkError(_) => "network_error",
            UploadError::CredentialRequestFailed { .. } => "credential_request_failed",
            UploadError::CredentialExpired => "credential_expired",
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Unauthenticated { status } | UploadError::TransferFailed { status } => {
                Some(*status)
            }
            UploadError::CredentialRequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Map an I/O error on the local resource to the matching variant.
    pub(crate) fn from_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            UploadError::ResourceNotFound(path.to_path_buf())
        } else {
            UploadError::ResourceUnreadable {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }
}

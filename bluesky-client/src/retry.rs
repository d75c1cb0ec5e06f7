use bluemigrate_core::{BlueskyApiError, ErrorExt, FailureKind};
use std::fmt;
use std::time::Duration;

/// What the publisher does after a failed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait, then continue with the next post.
    Backoff(Duration),
    /// Stop the whole job.
    Abort,
    /// Log and continue with the next post.
    Skip,
}

/// Determine recovery based on error type
pub fn recovery_for(error: &BlueskyApiError, rate_limit_backoff: Duration) -> RecoveryAction {
    let kind = error.failure_kind();
    if kind.is_fatal() {
        return RecoveryAction::Abort;
    }
    match kind {
        FailureKind::RateLimited => RecoveryAction::Backoff(rate_limit_backoff),
        _ => RecoveryAction::Skip,
    }
}

/// Why a single media upload was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailureKind {
    RateLimited,
    TooLarge,
    UnsupportedFormat,
    Other,
}

impl UploadFailureKind {
    pub fn classify(error: &BlueskyApiError) -> Self {
        match error {
            BlueskyApiError::RateLimited { .. } => UploadFailureKind::RateLimited,
            BlueskyApiError::PayloadTooLarge => UploadFailureKind::TooLarge,
            BlueskyApiError::UnsupportedFormat { .. } => UploadFailureKind::UnsupportedFormat,
            _ => UploadFailureKind::Other,
        }
    }
}

impl fmt::Display for UploadFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadFailureKind::RateLimited => "rate limit",
            UploadFailureKind::TooLarge => "image too large",
            UploadFailureKind::UnsupportedFormat => "unsupported format",
            UploadFailureKind::Other => "upload error",
        };
        f.write_str(label)
    }
}

use crate::error::*;
use serde::Serialize;
use tracing::{error, warn};

/// Coarse failure taxonomy used to decide how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    AuthExpired,
    NotFound,
    BadRequest,
    TransientNetwork,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::NotFound => "not_found",
            FailureKind::BadRequest => "bad_request",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Only an expired session unwinds past the thread that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::AuthExpired)
    }
}

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn failure_kind(&self) -> FailureKind;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!(error_code = %self.error_code(), "CoreError: {}", self);
        match self {
            CoreError::TwitterApi(e) => {
                error!("Twitter API error details: {:?}", e);
            }
            CoreError::BlueskyApi(e) => {
                error!("Bluesky API error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(error_code = %self.error_code(), "CoreError (warning): {}", self);
        self
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            CoreError::TwitterApi(e) => e.failure_kind(),
            CoreError::BlueskyApi(e) => e.failure_kind(),
            CoreError::Network(e) if e.is_timeout() || e.is_connect() => {
                FailureKind::TransientNetwork
            }
            CoreError::InvalidInput { .. } => FailureKind::BadRequest,
            CoreError::NotFound { .. } => FailureKind::NotFound,
            _ => FailureKind::Unknown,
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::TwitterApi(_) => "TWITTER_API".to_string(),
            CoreError::BlueskyApi(_) => "BLUESKY_API".to_string(),
            CoreError::Media(_) => "MEDIA".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::NotFound { .. } => "NOT_FOUND".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl TwitterApiError {
    /// The distinguished "too many requests" condition the budget tracker reacts to.
    pub fn is_rate_limit_signal(&self) -> bool {
        match self {
            TwitterApiError::TooManyRequests { .. } => true,
            TwitterApiError::RequestFailed { status_code, .. } => *status_code == Some(429),
            _ => false,
        }
    }
}

impl ErrorExt for TwitterApiError {
    fn log_error(&self) -> &Self {
        error!(error_code = %self.error_code(), "TwitterApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(error_code = %self.error_code(), "TwitterApiError (warning): {}", self);
        self
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            _ if self.is_rate_limit_signal() => FailureKind::RateLimited,
            TwitterApiError::Unauthorized => FailureKind::AuthExpired,
            TwitterApiError::UserNotFound { .. } | TwitterApiError::PostNotFound { .. } => {
                FailureKind::NotFound
            }
            TwitterApiError::InvalidThreadUrl { .. } => FailureKind::BadRequest,
            TwitterApiError::RequestFailed {
                status_code: None, ..
            } => FailureKind::TransientNetwork,
            _ => FailureKind::Unknown,
        }
    }

    fn error_code(&self) -> String {
        match self {
            TwitterApiError::TooManyRequests { .. } => "TWITTER_RATE_LIMIT".to_string(),
            TwitterApiError::UserNotFound { .. } => "TWITTER_USER_NOT_FOUND".to_string(),
            TwitterApiError::PostNotFound { .. } => "TWITTER_POST_NOT_FOUND".to_string(),
            TwitterApiError::InvalidThreadUrl { .. } => "TWITTER_INVALID_THREAD_URL".to_string(),
            TwitterApiError::Unauthorized => "TWITTER_UNAUTHORIZED".to_string(),
            TwitterApiError::RequestFailed { .. } => "TWITTER_REQUEST_FAILED".to_string(),
        }
    }
}

impl ErrorExt for BlueskyApiError {
    fn log_error(&self) -> &Self {
        error!(error_code = %self.error_code(), "BlueskyApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(error_code = %self.error_code(), "BlueskyApiError (warning): {}", self);
        self
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            BlueskyApiError::RateLimited { .. } => FailureKind::RateLimited,
            BlueskyApiError::AuthExpired { .. } => FailureKind::AuthExpired,
            BlueskyApiError::NotFound { .. } => FailureKind::NotFound,
            BlueskyApiError::BadRequest { .. }
            | BlueskyApiError::PayloadTooLarge
            | BlueskyApiError::UnsupportedFormat { .. } => FailureKind::BadRequest,
            BlueskyApiError::Transient { .. } | BlueskyApiError::ServerError { .. } => {
                FailureKind::TransientNetwork
            }
            BlueskyApiError::Unknown { .. } => FailureKind::Unknown,
        }
    }

    fn error_code(&self) -> String {
        match self {
            BlueskyApiError::RateLimited { .. } => "BLUESKY_RATE_LIMIT".to_string(),
            BlueskyApiError::AuthExpired { .. } => "BLUESKY_AUTH_EXPIRED".to_string(),
            BlueskyApiError::NotFound { .. } => "BLUESKY_NOT_FOUND".to_string(),
            BlueskyApiError::BadRequest { .. } => "BLUESKY_BAD_REQUEST".to_string(),
            BlueskyApiError::PayloadTooLarge => "BLUESKY_PAYLOAD_TOO_LARGE".to_string(),
            BlueskyApiError::UnsupportedFormat { .. } => "BLUESKY_UNSUPPORTED_FORMAT".to_string(),
            BlueskyApiError::ServerError { .. } => "BLUESKY_SERVER_ERROR".to_string(),
            BlueskyApiError::Transient { .. } => "BLUESKY_TRANSIENT".to_string(),
            BlueskyApiError::Unknown { .. } => "BLUESKY_UNKNOWN".to_string(),
        }
    }
}

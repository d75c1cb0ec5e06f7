use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Twitter API error: {0}")]
    TwitterApi(#[from] TwitterApiError),

    #[error("Bluesky API error: {0}")]
    BlueskyApi(#[from] BlueskyApiError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum TwitterApiError {
    #[error("Too many requests on {endpoint}")]
    TooManyRequests { endpoint: String },

    #[error("User not found: {handle}")]
    UserNotFound { handle: String },

    #[error("Post not found: {post_id}")]
    PostNotFound { post_id: String },

    #[error("Invalid thread URL: {url}")]
    InvalidThreadUrl { url: String },

    #[error("Session cookies rejected")]
    Unauthorized,

    #[error("Request failed ({status_code:?}): {message}")]
    RequestFailed {
        status_code: Option<u16>,
        message: String,
    },
}

#[derive(Error, Debug, Clone)]
pub enum BlueskyApiError {
    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Session expired or unauthorized: {reason}")]
    AuthExpired { reason: String },

    #[error("Resource not found: {details}")]
    NotFound { details: String },

    #[error("Bad request: {details}")]
    BadRequest { details: String },

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Unsupported media format: {details}")]
    UnsupportedFormat { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Transient network failure: {message}")]
    Transient { message: String },

    #[error("Unexpected response: {message}")]
    Unknown { message: String },
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Image decoding failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("Image encoding failed: {reason}")]
    EncodeFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

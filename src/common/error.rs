//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// WeeChat relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("Invalid relay message: {message}")]
    Protocol { message: String },

    #[error("Relay message too short: need {needed} bytes, got {got}")]
    MessageTooShort { needed: usize, got: usize },

    #[error("Connection closed by relay")]
    ConnectionClosed,

    #[error("Relay connection is not running")]
    NotConnected,

    #[error("Timed out waiting for relay")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Slack-related errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Slack API call '{method}' failed: {error}")]
    Api { method: String, error: String },

    #[error("Slack authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Channel not found: {channel}")]
    ChannelNotFound { channel: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid Slack payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl SinkError {
    /// Build an API error from a method name and Slack's `error` field.
    pub fn api(method: &str, error: Option<String>) -> Self {
        Self::Api {
            method: method.to_string(),
            error: error.unwrap_or_else(|| "unknown error".to_string()),
        }
    }

    /// Whether Slack rejected the credentials rather than the request.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Self::AuthFailed { .. } => true,
            Self::Api { error, .. } => matches!(
                error.as_str(),
                "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked"
            ),
            _ => false,
        }
    }
}

/// File upload errors. The display text is posted into Slack verbatim.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Uploading files is not enabled.")]
    Disabled,

    #[error("Failed to upload file ({0})")]
    Http(#[from] reqwest::Error),

    #[error("Failed to upload file (status code: {0})")]
    Status(u16),

    #[error("Failed to upload file (status code: {0})")]
    Rejected(String),

    #[error("Failed to upload file ({0})")]
    InvalidResponse(String),
}

/// Result type alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Result type alias for Slack operations.
pub type SinkResult<T> = std::result::Result<T, SinkError>;

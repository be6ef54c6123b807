//! Error handling for the SafeWatch client
//!
//! Rejected (stale) frames are not errors; see `frame_sequencer::AdmitResult`.

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection dropped or could not be established; retried with backoff
    #[error("Connection error: {0}")]
    TransientConnection(String),

    /// Handshake did not complete in time (handled like a transient failure)
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Reconnect attempts exhausted; requires a new `open`
    #[error("Connection failed after {attempts} attempts: {message}")]
    TerminalConnection { attempts: u32, message: String },

    /// A single frame could not be decoded
    #[error("Decode failure for frame {sequence}: {message}")]
    DecodeFailure { sequence: u64, message: String },

    /// Poll or acknowledge request failed
    #[error("Request failed: {0}")]
    RequestFailure(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error (malformed feed message)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Base64 payload error
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is expected to clear up on its own (next retry / next tick)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientConnection(_)
            | Error::HandshakeTimeout(_)
            | Error::RequestFailure(_)
            | Error::WebSocket(_)
            | Error::Io(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Short machine-readable code, used as a structured log field
    pub fn code(&self) -> &'static str {
        match self {
            Error::TransientConnection(_) => "TRANSIENT_CONNECTION",
            Error::HandshakeTimeout(_) => "HANDSHAKE_TIMEOUT",
            Error::TerminalConnection { .. } => "TERMINAL_CONNECTION",
            Error::DecodeFailure { .. } => "DECODE_FAILURE",
            Error::RequestFailure(_) => "REQUEST_FAILURE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::WebSocket(_) => "WEBSOCKET_ERROR",
            Error::Image(_) => "IMAGE_ERROR",
            Error::Base64(_) => "BASE64_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

//! Exchange error types

use std::time::Duration;
use thiserror::Error;

/// Custom result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Couldn't connect to WS within {after:?}{}", .cause.as_ref().map(|c| format!(": {}", c)).unwrap_or_default())]
    ConnectTimeout { after: Duration, cause: Option<String> },

    #[error("Unable to subscribe to {topic}. Error: \"{message}\"")]
    Subscription { topic: String, message: String },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Transport closed")]
    TransportClosed,

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    #[error("Delete for a row missing from table {table}")]
    DeleteMiss { table: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid endpoint: {details}")]
    InvalidEndpoint { details: String },

    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Not connected")]
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ends the current connection
    Fatal,
    /// Contained to the message or call that raised it
    Recoverable,
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectTimeout { .. }
            | Self::Subscription { .. }
            | Self::Authentication { .. }
            | Self::BadRequest { .. }
            | Self::Transport { .. }
            | Self::TransportClosed => ErrorKind::Fatal,
            _ => ErrorKind::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport { message: err.to_string() }
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint { details: err.to_string() }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Http { message: err.to_string() }
        }
    }
}

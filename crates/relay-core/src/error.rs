//! Error types for relay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using relay's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-visible failure classes carried by a failed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No ready channel. Never retried.
    SessionUnavailable,
    /// No anchor reply arrived within the budget.
    Timeout,
    /// Connectivity fault while the query was in flight.
    ChannelError,
    /// Identifier failed the 8-digit format check.
    MalformedInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SessionUnavailable => "SESSION_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ChannelError => "CHANNEL_ERROR",
            ErrorKind::MalformedInput => "MALFORMED_INPUT",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for relay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Session is not ready to accept queries
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// Operation exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Channel connectivity fault (send, fetch, connect)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Caller input rejected before any channel interaction
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Attachment download or decode failed
    #[error("Media error: {0}")]
    Media(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map onto the caller-visible kind, if this error can reach a caller.
    ///
    /// Media errors are swallowed by the engine and have no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::SessionUnavailable(_) => Some(ErrorKind::SessionUnavailable),
            Error::Timeout(_) => Some(ErrorKind::Timeout),
            Error::Channel(_) | Error::Io(_) => Some(ErrorKind::ChannelError),
            Error::MalformedInput(_) => Some(ErrorKind::MalformedInput),
            Error::Media(_) | Error::Config(_) | Error::Internal(_) => None,
        }
    }

    /// Whether this error should trigger the restart-and-retry policy.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Channel(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_session_unavailable() {
        let err = Error::SessionUnavailable("not connected".to_string());
        assert_eq!(err.to_string(), "Session unavailable: not connected");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout("no reply in 30s".to_string());
        assert_eq!(err.to_string(), "Timeout: no reply in 30s");
    }

    #[test]
    fn test_error_display_channel() {
        let err = Error::Channel("socket closed".to_string());
        assert_eq!(err.to_string(), "Channel error: socket closed");
    }

    #[test]
    fn test_error_display_malformed_input() {
        let err = Error::MalformedInput("1234".to_string());
        assert_eq!(err.to_string(), "Malformed input: 1234");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::SessionUnavailable(String::new()).kind(),
            Some(ErrorKind::SessionUnavailable)
        );
        assert_eq!(Error::Timeout(String::new()).kind(), Some(ErrorKind::Timeout));
        assert_eq!(
            Error::Channel(String::new()).kind(),
            Some(ErrorKind::ChannelError)
        );
        assert_eq!(
            Error::MalformedInput(String::new()).kind(),
            Some(ErrorKind::MalformedInput)
        );
        assert_eq!(Error::Media(String::new()).kind(), None);
        assert_eq!(Error::Internal(String::new()).kind(), None);
    }

    #[test]
    fn test_only_channel_faults_are_connectivity() {
        assert!(Error::Channel("x".into()).is_connectivity());
        assert!(Error::Io(std::io::Error::other("x")).is_connectivity());
        assert!(!Error::Timeout("x".into()).is_connectivity());
        assert!(!Error::SessionUnavailable("x".into()).is_connectivity());
        assert!(!Error::Media("x".into()).is_connectivity());
    }

    #[test]
    fn test_error_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::SessionUnavailable).unwrap();
        assert_eq!(json, "\"SESSION_UNAVAILABLE\"");
        let json = serde_json::to_string(&ErrorKind::ChannelError).unwrap();
        assert_eq!(json, "\"CHANNEL_ERROR\"");
        assert_eq!(ErrorKind::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}

//! Server error types.

use std::time::Duration;

use thiserror::Error;

/// A write to a client transport failed. Fatal to that session only.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the socket is gone.
    #[error("transport closed")]
    Closed,
    /// A single write exceeded the send timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    /// WebSocket protocol or I/O failure.
    #[error("websocket error: {0}")]
    Ws(#[from] axum::Error),
}

impl TransportError {
    /// Metric label.
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Timeout(_) => "timeout",
            Self::Ws(_) => "ws",
        }
    }
}

/// A transport could not be turned into a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The server is shutting down.
    #[error("server is shutting down")]
    ShuttingDown,
    /// The connection limit is reached.
    #[error("connection limit reached ({limit})")]
    AtCapacity {
        /// Configured limit.
        limit: usize,
    },
}

impl HandshakeError {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ShuttingDown => "shutting_down",
            Self::AtCapacity { .. } => "at_capacity",
        }
    }
}

/// A bus subscription filter was malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid channel filter {filter:?}: {reason}")]
pub struct FilterError {
    /// The filter as given.
    pub filter: String,
    /// What is wrong with it.
    pub reason: &'static str,
}

/// Errors surfaced by server setup and lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Other socket I/O.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
    /// Bad bus filter.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// The persistence writer has stopped.
    #[error("persistence writer stopped")]
    WriterStopped,
}

/// Convenience alias for server results.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_reason_labels() {
        assert_eq!(HandshakeError::ShuttingDown.reason(), "shutting_down");
        assert_eq!(HandshakeError::AtCapacity { limit: 3 }.reason(), "at_capacity");
        assert_eq!(
            HandshakeError::AtCapacity { limit: 3 }.to_string(),
            "connection limit reached (3)"
        );
    }

    #[test]
    fn filter_error_display() {
        let err = FilterError {
            filter: "a/#/b".into(),
            reason: "'#' must be the last segment",
        };
        assert!(err.to_string().contains("a/#/b"));
        let server: ServerError = err.into();
        assert!(server.to_string().contains("last segment"));
    }

    #[test]
    fn timeout_display() {
        let err = TransportError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "send timed out after 250ms");
        assert_eq!(err.cause(), "timeout");
        assert_eq!(TransportError::Closed.cause(), "closed");
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::instrument::Role;
use crate::net::Endpoint;

/// Failures surfaced by a single instrument connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("server is full")]
    ServerFull,

    #[error("handshake rejected by server")]
    HandshakeRejected,

    #[error("invalid property {property} for {role}")]
    InvalidProperty { role: Role, property: String },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("not connected")]
    NotConnected,

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Errors that may clear up after reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::Timeout { .. }
                | ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::ConnectionClosed
        )
    }

    /// Errors after which replies can no longer be matched to commands.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. } | ClientError::Io(_) | ClientError::ConnectionClosed
        )
    }
}

/// Failures of a full point-and-expose run.
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("observatory is not available: {0}")]
    ObservatoryUnavailable(String),

    #[error("an observation is already in progress, try again later")]
    ObservationInProgress,

    #[error("{role} rejected {property} = {value}")]
    CommandRejected {
        role: Role,
        property: String,
        value: String,
    },

    #[error("telescope did not finish slewing within {waited:?}")]
    SlewTimeout { waited: Duration },

    #[error("observation cancelled")]
    Cancelled,

    #[error("invalid observation request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_breaking_errors() {
        let timeout = ClientError::Timeout {
            operation: "status",
            after: Duration::from_millis(100),
        };
        assert!(timeout.breaks_connection());
        assert!(timeout.is_transient());
        assert!(ClientError::ConnectionClosed.breaks_connection());

        let protocol = ClientError::Protocol("BOGUS".to_string());
        assert!(protocol.is_transient());
        assert!(!protocol.breaks_connection());

        assert!(!ClientError::NotConnected.is_transient());
        assert!(!ClientError::ServerFull.breaks_connection());
    }
}

//! # Client Errors
//!
//! One error type for every failure the core can surface, so callers can
//! tell validation, protocol, connectivity and timeout failures apart and
//! pick their own retry policy.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use mcpool_common::ValidationError;

use crate::connection::ConnectionState;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Response did not follow the ASCII protocol grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Server answered with `ERROR`, `CLIENT_ERROR` or `SERVER_ERROR`.
    #[error("server error response: {line}")]
    ErrorResponse { line: String },

    /// Server sent a blank line where a response was expected.
    #[error("empty response line")]
    EmptyLine,

    /// Status or token not legal for the command that was sent.
    #[error("unexpected response to {verb}: {line}")]
    UnexpectedResponse { verb: &'static str, line: String },

    /// `VALUE` header with missing or non-numeric fields.
    #[error("invalid item header: {line}")]
    MalformedItem { line: String },

    /// Single-key retrieval received a second item.
    #[error("server returned more items than expected for {verb}")]
    TooManyItems { verb: &'static str },

    /// Response line was not valid UTF-8.
    #[error("response line is not valid utf-8")]
    InvalidUtf8,

    /// Value block was not followed by `\r\n`.
    #[error("value block for {key} is not terminated by CRLF")]
    MissingTerminator { key: String },
}

/// Errors surfaced by the client core and facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Argument rejected before any I/O.
    #[error("invalid argument: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed or unexpected server response.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Network failure during connect, send, or receive.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the stream before a full response arrived.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// The connection cannot be used in its current lifecycle state.
    #[error("connection is {0}")]
    InvalidState(ConnectionState),

    /// Connect or receive exceeded its configured bound.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The pool failed to create an item. Shared by every caller that
    /// lands on the same pipelined slot.
    #[error("failed to create pooled {kind}: {source}")]
    PoolCreation {
        kind: &'static str,
        #[source]
        source: Arc<ClientError>,
    },

    /// The pool was disposed before or while borrowing.
    #[error("pool has been disposed")]
    Disposed,
}

impl ClientError {
    /// True for argument errors that were detected without I/O.
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// True for grammar violations and server error verbs.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Protocol(_))
    }

    /// True for timeouts on connect or receive.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    /// True when the failure came from the network or a broken connection.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::EndOfStream | ClientError::InvalidState(_) => true,
            ClientError::PoolCreation { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_names_verb_and_line() {
        let err = ClientError::from(ProtocolError::UnexpectedResponse {
            verb: "add",
            line: "EXISTS".to_string(),
        });
        let message = err.to_string();
        assert!(message.contains("add"));
        assert!(message.contains("EXISTS"));
        assert!(err.is_protocol());
    }

    #[test]
    fn classifies_connectivity() {
        let io = ClientError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(io.is_connectivity());
        assert!(ClientError::EndOfStream.is_connectivity());
        assert!(ClientError::InvalidState(ConnectionState::Faulted).is_connectivity());
        assert!(!ClientError::Disposed.is_connectivity());

        let wrapped = ClientError::PoolCreation {
            kind: "Connection",
            source: Arc::new(io),
        };
        assert!(wrapped.is_connectivity());
        assert!(wrapped.to_string().starts_with("failed to create pooled Connection"));
    }

    #[test]
    fn timeout_display() {
        let err = ClientError::Timeout {
            operation: "receive",
            timeout: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "receive timed out after 250ms");
    }
}

//! Error types for the dyad protocol.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors decoding an envelope or one of its payloads.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Datagram is not valid JSON, or a payload has the wrong shape.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` field names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Payload was requested for a different message type.
    #[error("payload mismatch: expected {expected}, got {actual}")]
    PayloadMismatch {
        /// Type the caller asked for.
        expected: &'static str,
        /// Type carried by the envelope.
        actual: String,
    },

    /// Datagram exceeds the maximum envelope size.
    #[error("envelope too large: {size} > {max}")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Allowed size.
        max: usize,
    },
}

/// Errors from the UDP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Envelope could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EnvelopeError),

    /// The receive task has stopped and the queue is closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether the caller may simply try again later.
    ///
    /// UDP send errors such as `ConnectionRefused` (ICMP port unreachable
    /// from a peer that is not up yet) or a full socket buffer are transient.
    /// Encoding errors and a closed transport are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
            ),
            TransportError::Encode(_) | TransportError::Closed => false,
        }
    }
}

/// Errors from a result sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the record failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Record could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Top-level protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fatal transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No pong arrived before the connect timeout and no fallback is configured.
    #[error("peer unreachable after {waited:?}")]
    PeerUnreachable {
        /// How long the handshake waited.
        waited: Duration,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The result sink rejected a record.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let refused = TransportError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(refused.is_transient());

        let denied = TransportError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_transient());

        assert!(!TransportError::Closed.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PeerUnreachable {
            waited: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "peer unreachable after 30s");

        let err = EnvelopeError::UnknownType("stage_bogus".into());
        assert_eq!(err.to_string(), "unknown message type: stage_bogus");
    }
}

use thiserror::Error;

/// Tagged error type for the inner tunnel protocol, per the error
/// taxonomy: transport/protocol/handshake failures terminate the
/// session; auth rejection and envelope failures are caller-observable.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("authentication failure (MAC mismatch)")]
    AuthFailure,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("timed out waiting for frame")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

impl From<tokio::time::error::Elapsed> for TunnelError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TunnelError::Timeout
    }
}

use thiserror::Error;

/// Coarse error classification carried inside `ControlEvent::Error`.
/// Fatality decisions live in the session state machine, not at the
/// raise site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionFailed,
    AuthFailed,
    DeviceUnavailable,
    ProtocolError,
    Overflow,
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Remote endpoint unreachable or dropped. Recoverable once via
    /// reconnect; a second consecutive failure tears the session down.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Rejected credentials at session open. No retry.
    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    /// Audio or motor hardware missing. Fatal at startup; mid-session it
    /// tears the session down but not the process.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Malformed or unexpected event from the endpoint. Logged, skipped.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Bounded queue dropped a frame under backpressure. Counted only.
    #[error("queue overflow on {0}")]
    Overflow(&'static str),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            CoreError::AuthFailed(_) => ErrorKind::AuthFailed,
            CoreError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            CoreError::ProtocolError(_) => ErrorKind::ProtocolError,
            CoreError::Overflow(_) => ErrorKind::Overflow,
        }
    }
}

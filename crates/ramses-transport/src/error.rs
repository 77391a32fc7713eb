/// Errors raised by the gateway transport.
///
/// These are never conflated with decode failures: a transport error means the
/// byte stream itself is unusable, while a malformed line is normal traffic.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the gateway device or bridge.
    #[error("failed to open {target}: {source}")]
    Open {
        target: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached EOF.
    #[error("transport disconnected")]
    Disconnected,

    /// A blocking read returned without data before its timeout.
    #[error("transport read timed out")]
    Timeout,

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// True when the caller may simply retry the read.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

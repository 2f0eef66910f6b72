use thiserror::Error;

/// Errors raised while framing, encoding or moving messages on the wire.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("Frame has {0} trailing bytes after the message")]
    TrailingBytes(usize),

    #[error("Response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the peer sent bytes that do not form a valid message.
    ///
    /// Protocol errors point at a version mismatch or a misbehaving node
    /// rather than at the network.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            WireError::FrameTooLarge { .. }
                | WireError::Serialization(_)
                | WireError::TrailingBytes(_)
                | WireError::IdMismatch { .. }
        )
    }
}

impl From<rustls::Error> for WireError {
    fn from(err: rustls::Error) -> Self {
        WireError::Tls(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WireError>;

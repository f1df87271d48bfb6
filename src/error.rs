//! Error types for the PHD2 guider client

/// Errors that can occur when interacting with PHD2.
///
/// This is the complete taxonomy the rest of the crate surfaces to callers;
/// nothing lower-level (socket errors, JSON parse errors on the read path)
/// escapes past a module boundary as anything else.
#[derive(Debug, thiserror::Error)]
pub enum Phd2Error {
    #[error("failed to connect to PHD2: {0}")]
    ConnectError(String),

    #[error("write failed: {0}")]
    WriteError(String),

    #[error("not connected")]
    NotConnected,

    #[error("PHD2 returned an error: {0}")]
    RpcError(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("not settling")]
    NotSettling,

    #[error("unknown PHD2 equipment profile: {0}")]
    UnknownProfile(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for PHD2 operations.
pub type Result<T> = std::result::Result<T, Phd2Error>;

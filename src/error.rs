//! WolfSync Error Types

use thiserror::Error;

/// Result type alias for WolfSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Local store errors
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    // Protocol errors
    #[error("Unknown action {0:?}")]
    UnknownAction(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Control message encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Truncated transfer of {filename}: expected {expected} bytes, received {received}")]
    TruncatedTransfer {
        filename: String,
        expected: u64,
        received: u64,
    },

    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Peer reported an error: {0}")]
    RemoteError(String),

    // Cluster errors
    #[error("Node not found in cluster membership: {0}")]
    UnknownNode(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error means the file does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::FileNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this error came from the network rather than the local disk
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::TruncatedTransfer { .. }
                | Error::Protocol(_)
                | Error::RemoteError(_)
        )
    }
}

//! Error types for skiff

use std::fmt;

/// Unified error type for all skiff operations
#[derive(Debug)]
pub enum SkiffError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (malformed or out-of-sequence packets)
    Protocol(String),

    /// Codec error (packet buffer overflow or underrun)
    Codec(String),

    /// Channel error (transport gone or refusing data)
    Channel(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for SkiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkiffError::Io(e) => write!(f, "IO error: {}", e),
            SkiffError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SkiffError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SkiffError::Codec(msg) => write!(f, "Codec error: {}", msg),
            SkiffError::Channel(msg) => write!(f, "Channel error: {}", msg),
            SkiffError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for SkiffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SkiffError::Io(e) => Some(e),
            SkiffError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SkiffError {
    fn from(err: std::io::Error) -> Self {
        SkiffError::Io(err)
    }
}

/// Result type for skiff operations
pub type SkiffResult<T> = Result<T, SkiffError>;

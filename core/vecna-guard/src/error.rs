//! Error types for the guard crate.

use thiserror::Error;

/// Guard errors.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Another agent process holds the single-instance lock.
    #[error("another instance is already running")]
    AlreadyRunning,

    /// The signal listener could not bind its port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

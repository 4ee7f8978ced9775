//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing, stitching or persisting a page
#[derive(Error, Debug)]
pub enum Error {
    /// The page agent never answered a ping, even after injection
    #[error("Page unreachable: agent did not respond after {attempts} ping attempts")]
    AgentUnreachable { attempts: u32 },

    /// The host refused to inject the page agent (e.g. a protected page)
    #[error("Agent injection failed: {0}")]
    InjectionFailed(String),

    /// The page agent replied with an error or could not be reached
    #[error("Agent error: {0}")]
    AgentError(String),

    /// The host screenshot primitive failed
    #[error("Capture device error: {0}")]
    CaptureDeviceError(String),

    /// A frame failed to decode or the output canvas could not be allocated
    #[error("Stitching failed: {0}")]
    StitchFailure(String),

    /// A reply did not match the request that was sent
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A capture session is already running for this tab
    #[error("A capture is already in progress for tab {0}")]
    CaptureInProgress(u32),

    /// Failed to load a page source
    #[error("Failed to load page: {0}")]
    LoadError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Persisted capture state could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

//! Error types for the preset store and the conversion pipeline

use thiserror::Error;

/// Result type alias for placeholdr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing presets or producing downloads
#[derive(Error, Debug)]
pub enum Error {
    /// Width or height was zero, negative, or not a number
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    /// The preset is already in the list
    #[error("Preset {0} already exists")]
    DuplicatePreset(crate::Preset),

    /// Index does not address an entry of the preset list
    #[error("Preset index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The image source answered with a non-success status
    #[error("Fetch failed with HTTP status {status}")]
    FetchFailed { status: u16 },

    /// The fetched bytes could not be decoded as an image
    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    /// The surface could not be encoded to the target format
    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    /// Persisting the preset list failed after all attempts
    #[error("Backend write failed after {attempts} attempt(s): {reason}")]
    BackendWriteFailed { attempts: u32, reason: String },

    /// Backend read or bookkeeping error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transport-level network error (no HTTP status available)
    #[error("Network error: {0}")]
    Network(String),

    /// The download dispatcher could not write the payload
    #[error("Download failed: {0}")]
    Download(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error aborts a download attempt (as opposed to input or
    /// store bookkeeping errors)
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            Error::FetchFailed { .. }
                | Error::DecodeFailed(_)
                | Error::EncodeFailed(_)
                | Error::Network(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::ConfigError(format!("bad image service URL: {}", err))
    }
}

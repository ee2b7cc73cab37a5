//! Error types for vsp-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportStatus;

/// Main error type for vsp-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source rejected at construction (unsupported URL, missing file)
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// The audio source could not produce a descriptor
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A descriptor could not be turned into a playable resource
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The transcoder process could not be started
    #[error("Failed to spawn transcoder '{program}': {source}")]
    TranscoderSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport rejected an operation or reported a failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport did not reach the requested status in time
    #[error("Timed out after {waited:?} waiting for transport status {target}")]
    StateTimeout {
        target: TransportStatus,
        waited: Duration,
    },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors bubbled up from vsp-common
    #[error(transparent)]
    Common(#[from] vsp_common::Error),
}

impl Error {
    /// Whether the rendered error carries an HTTP 429 signature.
    ///
    /// Upstream rate limiting affects every track, so callers stop instead of
    /// retrying when this returns true.
    pub fn is_rate_limited(&self) -> bool {
        self.to_string().contains("429")
    }

    /// Whether this is a timeout waiting for a transport status
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::StateTimeout { .. })
    }
}

/// Convenience Result type using vsp-player Error
pub type Result<T> = std::result::Result<T, Error>;

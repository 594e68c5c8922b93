//! Error types for mirroring operations

use std::time::Duration;
use thiserror::Error;

/// Result type alias for mirroring operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring a device
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Could not connect to the capture server socket
    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed {
        /// Address that was dialled
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// Host/port could not be resolved to a socket address
    #[error("Could not resolve address '{0}'")]
    AddressResolution(String),

    /// Stream already started
    #[error("Stream already started")]
    StreamAlreadyStarted,

    /// Stream was stopped and cannot be restarted
    #[error("Stream already stopped")]
    StreamStopped,

    /// Decoder rejected the input or failed internally
    #[error("Decode error: {0}")]
    Decode(String),

    /// Device command (tap) failed
    #[error("Device command failed: {0}")]
    Device(String),

    /// Capture server could not be launched
    #[error("Capture server error: {0}")]
    Server(String),

    /// Capture server did not report readiness in time
    #[error("Capture server not ready after {0:?}")]
    ServerTimeout(Duration),

    /// Capture server exited before reporting readiness
    #[error("Capture server exited before it was ready")]
    ServerExited,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Errors after which the receive pipeline cannot continue
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::AddressResolution(_)
                | Self::StreamStopped
                | Self::ServerTimeout(_)
                | Self::ServerExited
                | Self::Io(_)
        )
    }

    /// Errors that are logged and skipped while the stream keeps running
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Device(_))
    }
}

//! Error types for the gateway.
//!
//! Every failure in the crate is a [`GatewayError`]. The variants map onto the
//! dispositions the gateway applies to them:
//!
//! - **Recoverable**: frame synchronization and payload parse errors are logged
//!   by the ingestion loop and the byte stream continues.
//! - **Isolated**: observer delivery failures never leave the fan-out.
//! - **Fatal**: transport failures cancel every activity and end the run;
//!   configuration and settings errors are raised before anything starts.
//!
//! ```rust
//! use dotbot_gateway::GatewayError;
//!
//! let error = GatewayError::transport_fatal("serial port vanished");
//! assert!(error.is_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Main error type for gateway operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Frame synchronization lost: {details}")]
    FrameSync { details: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Transport failure: {reason}")]
    TransportFatal {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Observer delivery failed: {reason}")]
    ClientSend { reason: String },

    #[error("Invalid controller configuration: {reason}")]
    Configuration { reason: String },

    #[error("Invalid settings in {path}: {details}")]
    Settings { path: PathBuf, details: String },

    #[error("Controller is not running")]
    Stopped,

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Returns whether this error must terminate the controller run.
    pub fn is_fatal(&self) -> bool {
        match self {
            GatewayError::FrameSync { .. } => false,
            GatewayError::Parse { .. } => false,
            GatewayError::ClientSend { .. } => false,
            GatewayError::Stopped => false,
            GatewayError::TransportFatal { .. } => true,
            GatewayError::Configuration { .. } => true,
            GatewayError::Settings { .. } => true,
            GatewayError::Io { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            GatewayError::FrameSync { .. } => vec![
                "Check the radio link for interference",
                "Verify both ends use the same flag and escape bytes",
            ],
            GatewayError::Parse { .. } => vec![
                "Check the gateway firmware protocol version",
                "Verify the sender uses a known payload type",
            ],
            GatewayError::TransportFatal { .. } => vec![
                "Check the serial cable and gateway power",
                "Verify the configured port and baudrate",
                "Restart the controller once the device is back",
            ],
            GatewayError::ClientSend { .. } => vec![
                "Reload the dashboard page",
                "Check the network path to the observer",
            ],
            GatewayError::Stopped => vec![
                "Check the controller run result for the cause",
                "Start a new controller run",
            ],
            GatewayError::Configuration { .. } => vec![
                "Check the controller name against the registered variants",
                "Verify addresses are valid hexadecimal",
            ],
            GatewayError::Settings { .. } => vec![
                "Check the settings file is valid YAML",
                "Verify addresses are hexadecimal strings",
            ],
            GatewayError::Io { .. } => vec![
                "Check file permissions",
                "Ensure the calibration directory exists",
            ],
        }
    }

    /// Helper constructor for frame synchronization errors.
    pub fn frame_sync(details: impl Into<String>) -> Self {
        GatewayError::FrameSync { details: details.into() }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        GatewayError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for fatal transport errors.
    pub fn transport_fatal(reason: impl Into<String>) -> Self {
        GatewayError::TransportFatal { reason: reason.into(), source: None }
    }

    /// Helper constructor for fatal transport errors with source.
    pub fn transport_fatal_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        GatewayError::TransportFatal { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for observer delivery errors.
    pub fn client_send(reason: impl Into<String>) -> Self {
        GatewayError::ClientSend { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        GatewayError::Configuration { reason: reason.into() }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GatewayError::Io { context: context.into(), source }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io { context: "<unknown>".to_string(), source: err }
    }
}

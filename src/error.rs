//! Error types and result definitions for the skyfan crate.
//! Covers session failures, command delivery and configuration problems.

use crate::characteristic::Characteristic;
use thiserror::Error;

/// Represents all errors that can occur while bridging a fan to HomeKit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Standard IO error (network, file access, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// Discovery or handshake with the device failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Device is currently unreachable or disconnected
    #[error("Device offline")]
    Offline,

    /// Request timed out inside the device session
    #[error("Timeout waiting for device")]
    Timeout,

    /// A set/get call to the device was rejected
    #[error("Command delivery failed for dp {dp}: {reason}")]
    CommandDelivery { dp: u32, reason: String },

    /// A configured device is missing required fields or carries invalid values
    #[error("Misconfigured device #{index}: {reason}")]
    MisconfiguredDevice { index: usize, reason: String },

    /// Device ID appears more than once in the configuration
    #[error("Device ID '{0}' already exists")]
    DuplicateDevice(String),

    /// Device ID not found in the registry
    #[error("Device ID '{0}' not found")]
    DeviceNotFound(String),

    /// The accessory does not expose this characteristic
    #[error("Characteristic {0:?} is not supported by this accessory")]
    UnsupportedCharacteristic(Characteristic),

    /// A characteristic write carried a value outside its domain
    #[error("Invalid value for {characteristic:?}: {reason}")]
    InvalidValue {
        characteristic: Characteristic,
        reason: String,
    },

    /// The controller's background tasks are no longer running
    #[error("Accessory controller stopped")]
    ControllerStopped,
}

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json(err.to_string())
    }
}

impl BridgeError {
    /// True for failures the reconnect supervisor recovers from on its own.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_)
                | BridgeError::ConnectionFailed(_)
                | BridgeError::Offline
                | BridgeError::Timeout
        )
    }
}

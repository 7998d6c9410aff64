//! Error types for mqttsn-client.

use thiserror::Error;

/// Main error type for all MQTT-SN client operations.
///
/// Admission errors are returned synchronously by request functions and
/// never create an operation. Outcomes of accepted operations are reported
/// through completion callbacks as [`AsyncOpStatus`](crate::AsyncOpStatus).
#[derive(Debug, Error)]
pub enum MqttsnError {
    /// Declared frame length exceeds the available bytes.
    #[error("Incomplete frame")]
    Incomplete,

    /// Malformed frame or out-of-range field value.
    #[error("Invalid frame: {0}")]
    Invalid(String),

    /// Encoded frame would not fit the 2-byte length prefix.
    #[error("Encoded frame of {size} bytes exceeds maximum length")]
    EncodingTooLarge { size: usize },

    /// No decoder registered for the message type id.
    #[error("Unsupported message type: {0:#04x}")]
    UnsupportedMessage(u8),

    /// Another asynchronous operation is in progress.
    #[error("Another operation is in progress")]
    Busy,

    /// Operation requires an established connection.
    #[error("Not connected")]
    NotConnected,

    /// Connect requested while already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// Operation is only valid in the asleep state.
    #[error("Not sleeping")]
    NotSleeping,

    /// Client has not been started.
    #[error("Client not started")]
    NotStarted,

    /// Client is already running.
    #[error("Client already started")]
    AlreadyStarted,

    /// Request parameter rejected.
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// Mandatory callback missing at start.
    #[error("Missing mandatory callback: {0}")]
    MissingCallback(&'static str),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using MqttsnError.
pub type Result<T> = std::result::Result<T, MqttsnError>;

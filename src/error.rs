//! Error types for the simulator
//!
//! Only the edges of the simulator can fail: socket I/O, MBAP framing and
//! loading unit definitions. The DSL and the physics loop degrade to default
//! values instead of returning errors.

use thiserror::Error;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by the simulator
#[derive(Error, Debug)]
pub enum ModbusError {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unit definition JSON could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed Modbus request
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// MBAP framing failure that leaves the byte stream unrecoverable
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Function code outside the supported set
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Payload does not match what its function code requires
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Bad configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Unit definition missing or unusable
    #[error("Unit definition error: {message}")]
    UnitDefinition { message: String },

    /// Operation exceeded its deadline
    #[error("Timeout: {operation} after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl ModbusError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a frame error
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a unit definition error
    pub fn unit_definition(message: impl Into<String>) -> Self {
        Self::UnitDefinition {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether a session must close after this error.
    ///
    /// Request-level problems (short payloads, unknown function codes) only
    /// drop the offending frame.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ModbusError::Io(_) | ModbusError::Frame { .. } | ModbusError::Timeout { .. }
        )
    }
}

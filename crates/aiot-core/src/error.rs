//! Error types for AIoT nodes

use thiserror::Error;

/// Core AIoT errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AiotError {
    // Wire errors
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Payload too large: limit {limit}, got {actual}")]
    PayloadTooLarge { limit: usize, actual: usize },

    // Link errors
    #[error("Link failure after {attempts} retries")]
    LinkFailure { attempts: u32 },

    #[error("Link driver error: {0}")]
    LinkDriver(String),

    // Session errors
    #[error("Session connect timed out")]
    SessionTimeout,

    #[error("Session is not connected")]
    SessionClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    // Command errors
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Parameter {param} out of range: {value}")]
    OutOfRange { param: &'static str, value: String },

    // Update errors
    #[error("Update transfer failed: {0}")]
    UpdateTransfer(String),

    // Storage errors
    #[error("Storage initialisation failed: {0}")]
    StorageInit(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AiotError {
    /// Whether the error ends the current cycle early without being a device fault.
    ///
    /// Link and session failures only truncate the cycle; storage failures
    /// survive a reinitialisation attempt and are then fatal.
    pub fn truncates_cycle(&self) -> bool {
        matches!(
            self,
            AiotError::LinkFailure { .. }
                | AiotError::LinkDriver(_)
                | AiotError::SessionTimeout
                | AiotError::SessionClosed
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AiotError::StorageInit(_))
    }
}

/// Result type for AIoT operations
pub type AiotResult<T> = Result<T, AiotError>;

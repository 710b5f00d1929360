//! Error types for the S0 counter
//!
//! Only configuration and hardware acquisition errors are meant to stop a
//! process; persistence and publish errors are reported to the caller so it
//! can log them and retry on the next scheduled tick.

use thiserror::Error;

use crate::line::LineId;

/// Result type alias for S0 counter operations
pub type Result<T> = std::result::Result<T, S0Error>;

/// Main error type for S0 counter operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum S0Error {
    /// Invalid meter or scheduler configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A hardware line could not be acquired or read
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Snapshot load or save failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A reading could not be handed to the publisher
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Errors detected while validating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Nothing to count
    #[error("No meters configured")]
    NoMeters,

    /// Two meters share a name
    #[error("Duplicate meter name: {0}")]
    DuplicateMeter(String),

    /// A meter has no line identifier
    #[error("Meter {0} has no line identifier")]
    MissingLine(String),

    /// Two meters are bound to the same hardware line
    #[error("Line {line} is used by both {first} and {second}")]
    DuplicateLine {
        line: LineId,
        first: String,
        second: String,
    },

    /// Counter constant must be a finite value > 0
    #[error("Meter {meter}: counter constant must be > 0, got {value}")]
    InvalidCounterConstant { meter: String, value: f64 },

    /// Scale factor must be finite
    #[error("Meter {meter}: scale factor must be finite, got {value}")]
    InvalidScaleFactor { meter: String, value: f64 },

    /// Periodic intervals must be > 0
    #[error("{0} must be greater than zero")]
    InvalidInterval(&'static str),
}

/// Errors raised by the hardware line collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// The line has already been requested
    #[error("Line {0} already in use")]
    LineInUse(LineId),

    /// The line was never requested or has been released
    #[error("Line {0} is not open")]
    LineNotOpen(LineId),

    /// The GPIO chip or driver could not be opened
    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    /// The current level could not be read
    #[error("Failed to read line {line}: {reason}")]
    Read { line: LineId, reason: String },

    /// The requested backend was not compiled in
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Errors raised by the persistence collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    /// Reading or writing the backing store failed
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// The backing store content could not be (de)serialized
    #[error("Malformed snapshot: {0}")]
    Format(String),
}

/// Errors raised by the publisher collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// The reading could not be encoded
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// The broker client refused the message
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker settings cannot produce a client
    #[error("Invalid broker options: {0}")]
    InvalidOptions(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = S0Error::Config(ConfigError::DuplicateLine {
            line: 17,
            first: "power".to_string(),
            second: "water".to_string(),
        });
        let msg = format!("{}", err);
        assert!(msg.contains("17"));
        assert!(msg.contains("power"));
        assert!(msg.contains("water"));
    }

    #[test]
    fn test_error_conversion() {
        let hw = HardwareError::LineInUse(4);
        let err: S0Error = hw.into();
        assert!(matches!(err, S0Error::Hardware(HardwareError::LineInUse(4))));
    }
}

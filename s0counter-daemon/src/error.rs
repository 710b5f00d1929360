// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! Daemon error type

use s0counter::{ConfigError, HardwareError, PersistenceError, PublishError, S0Error};
use thiserror::Error;

/// Errors that stop the daemon from starting or fail its shutdown
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Invalid configuration, unavailable hardware, unusable broker
    /// settings or a failed final snapshot
    #[error(transparent)]
    Core(#[from] S0Error),

    /// The settings file could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid YAML for the expected shape
    #[error("Invalid settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The HTTP listener could not be bound
    #[error("Cannot listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

impl From<ConfigError> for DaemonError {
    fn from(e: ConfigError) -> Self {
        Self::Core(e.into())
    }
}

impl From<HardwareError> for DaemonError {
    fn from(e: HardwareError) -> Self {
        Self::Core(e.into())
    }
}

impl From<PersistenceError> for DaemonError {
    fn from(e: PersistenceError) -> Self {
        Self::Core(e.into())
    }
}

impl From<PublishError> for DaemonError {
    fn from(e: PublishError) -> Self {
        Self::Core(e.into())
    }
}

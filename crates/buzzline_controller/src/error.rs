//! # Controller Error Types
//!
//! None of these are fatal to the process. Transport and arbitration errors
//! are absorbed by the tick loop; configuration errors surface at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Failures sending on the bus.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Transmit queue is full; the frame was not queued.
    #[error("bus transmit queue saturated")]
    Saturated,

    /// The bus driver side has gone away.
    #[error("bus is down")]
    BusDown,
}

/// Failures selecting a peripheral for a round.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationError {
    /// No peripheral is configured to take part in the match.
    #[error("no eligible peripherals available")]
    NoEligiblePeripherals,

    /// Eligible peripherals exist, but none has been heard from within the
    /// liveness window.
    #[error("{eligible} eligible peripheral(s), none online")]
    NoOnlinePeripherals {
        /// Size of the eligible set.
        eligible: usize,
    },
}

/// Errors loading or validating a [`crate::MatchConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

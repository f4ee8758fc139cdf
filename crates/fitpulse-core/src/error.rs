//! Core error type shared across FitPulse crates.

use thiserror::Error;

/// Errors raised by core facilities (config loading, filesystem setup).
#[derive(Debug, Error)]
pub enum FitPulseError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FitPulseError>;

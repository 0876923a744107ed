//! Core error types for rexec

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the rexec ecosystem
#[derive(Error, Debug)]
pub enum ExecError {
    /// Process could not be launched
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Command descriptor rejected
    #[error("Invalid command: {0}")]
    InvalidDescriptor(String),

    /// The runner task ended without producing a report
    #[error("Command task failed: {0}")]
    TaskFailed(String),
}

/// Failure to create the process for a command.
///
/// The display form is what the remote client sees on its stderr channel.
#[derive(Error, Debug)]
#[error("failed to launch '{program}': {source}")]
pub struct SpawnError {
    /// Program that was being launched
    pub program: String,
    /// Underlying OS error
    #[source]
    pub source: std::io::Error,
}

impl SpawnError {
    /// Create a new spawn error
    pub fn new(program: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            program: program.into(),
            source,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

//! rx-core: Core abstractions and configuration for rexec
//!
//! This crate provides the shared types, collaborator traits, and
//! configuration structures used by the execution engine and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ExecError, SpawnError};
pub use types::{BoxedReader, BoxedWriter, CommandDescriptor, EnvMode, ExecChannels, StreamChannel};

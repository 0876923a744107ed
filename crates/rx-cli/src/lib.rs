//! rexec: Command-line front end for the rexec execution core
//!
//! Runs a single command through `ServerExecCommand`, using the local
//! stdin/stdout/stderr as the stdio and stderr channels and an in-process
//! pipe as the command channel.

pub mod local;
pub mod output;
pub mod terminal;

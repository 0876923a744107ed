//! Process traits
//!
//! The execution engine does not create processes itself. A launcher turns
//! a [`CommandDescriptor`] into a live [`ProcessHandle`], whose streams are
//! taken by the forwarders and whose [`ProcessControl`] is shared with the
//! control-directive monitor.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SpawnError;
use crate::types::{BoxedReader, BoxedWriter, CommandDescriptor};
use rx_protocol::TerminalSize;

/// Creates processes from command descriptors
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the process described by `descriptor`
    fn spawn(&self, descriptor: &CommandDescriptor) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

/// A live process owned by one command invocation
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process ID, if known
    fn id(&self) -> Option<u32>;

    /// Take the writer feeding process stdin
    fn take_stdin(&mut self) -> Option<BoxedWriter>;

    /// Take the reader for process stdout
    fn take_stdout(&mut self) -> Option<BoxedReader>;

    /// Take the reader for process stderr.
    ///
    /// `None` means stderr is merged into stdout.
    fn take_stderr(&mut self) -> Option<BoxedReader>;

    /// Control handle for kill and resize
    fn control(&self) -> Arc<dyn ProcessControl>;

    /// Wait for the process to exit and return its exit code
    async fn wait(&mut self) -> std::io::Result<i32>;
}

/// Out-of-band control over a running process.
///
/// Implementations must be safe to call from any task while another task
/// is blocked in [`ProcessHandle::wait`].
pub trait ProcessControl: Send + Sync {
    /// Forcibly terminate the process
    fn kill(&self) -> std::io::Result<()>;

    /// Resize the process's pseudo-terminal
    fn resize(&self, size: TerminalSize) -> std::io::Result<()>;
}

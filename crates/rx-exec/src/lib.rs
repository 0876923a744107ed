//! rx-exec: Remote command execution engine
//!
//! Runs one command per [`ServerExecCommand`]: the process is spawned
//! through a [`ProcessLauncher`](rx_core::traits::ProcessLauncher), its
//! stdio is forwarded over transport channels, control directives are
//! applied while it runs, and its exit code is reported on the command
//! channel once all output has been delivered.

pub mod forwarder;
pub mod monitor;
pub mod process;
pub mod runner;

pub use forwarder::{ForwardOutcome, Forwarder, ForwarderHandle, StreamRole, DEFAULT_BUFFER_SIZE};
pub use monitor::{MonitorExit, MonitorReport, ProcessMonitor};
pub use process::{NativeLauncher, PipeLauncher, PtyLauncher};
pub use runner::{ExecHandle, ExecReport, ExecState, ServerExecCommand};

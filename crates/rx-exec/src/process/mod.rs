//! Native process launchers
//!
//! [`PipeLauncher`] runs commands with plain pipes, [`PtyLauncher`] runs
//! them on a pseudo-terminal, and [`NativeLauncher`] picks between the two
//! based on whether the descriptor asks for a terminal.

mod pipe;
mod pty;

pub use pipe::PipeLauncher;
pub use pty::PtyLauncher;

use std::process::ExitStatus;

use rx_core::config::ExecConfig;
use rx_core::traits::{ProcessHandle, ProcessLauncher};
use rx_core::{CommandDescriptor, SpawnError};

/// Launcher that uses a PTY when the descriptor carries a terminal size
#[derive(Debug, Clone, Default)]
pub struct NativeLauncher {
    pipe: PipeLauncher,
    pty: PtyLauncher,
}

impl NativeLauncher {
    /// Create a launcher with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a launcher from configuration
    pub fn from_config(config: &ExecConfig) -> Self {
        Self {
            pipe: PipeLauncher::new(),
            pty: PtyLauncher::with_defaults(config.default_env.clone())
                .with_buffer_size(config.buffer_size),
        }
    }
}

impl ProcessLauncher for NativeLauncher {
    fn spawn(&self, descriptor: &CommandDescriptor) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        if descriptor.terminal().is_some() {
            self.pty.spawn(descriptor)
        } else {
            self.pipe.spawn(descriptor)
        }
    }
}

/// Exit code reported for an OS exit status.
///
/// A process terminated by a signal reports `128 + signal`, the way shells
/// do.
pub(crate) fn exit_code_from_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code_from_status() {
        assert_eq!(exit_code_from_status(ExitStatus::from_raw(0)), 0);
        // Exit code 3 is stored in the high byte of the raw wait status
        assert_eq!(exit_code_from_status(ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGKILL
        assert_eq!(exit_code_from_status(ExitStatus::from_raw(9)), 137);
    }
}

//! Pseudo-terminal processes
//!
//! Uses the portable-pty crate. The PTY master is read and written with
//! blocking calls, so each direction is bridged to async on a blocking
//! thread through an in-memory duplex pipe.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portable_pty::{
    native_pty_system, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtyPair, PtySize,
};
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;

use rx_core::config::ExecConfig;
use rx_core::traits::{ProcessControl, ProcessHandle, ProcessLauncher};
use rx_core::{BoxedReader, BoxedWriter, CommandDescriptor, EnvMode, SpawnError};
use rx_protocol::TerminalSize;

use crate::forwarder::DEFAULT_BUFFER_SIZE;

/// Spawns processes attached to a new pseudo-terminal.
///
/// stdout and stderr share the terminal, so the process never exposes a
/// separate stderr stream.
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    /// Environment applied before the descriptor's entries
    default_env: Vec<(String, String)>,
    /// Capacity of the async bridges
    buffer_size: usize,
}

impl PtyLauncher {
    /// Create a PTY launcher with the default environment of [`ExecConfig`]
    pub fn new() -> Self {
        Self::with_defaults(ExecConfig::default().default_env)
    }

    /// Create a PTY launcher with custom default environment
    pub fn with_defaults(default_env: Vec<(String, String)>) -> Self {
        Self {
            default_env,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the capacity of the async bridges
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    fn build_command(&self, descriptor: &CommandDescriptor) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(descriptor.program());
        cmd.args(descriptor.args());

        if descriptor.env_mode() == EnvMode::Replace {
            cmd.env_clear();
        }
        for (key, value) in &self.default_env {
            cmd.env(key, value);
        }
        for (key, value) in descriptor.env() {
            cmd.env(key, value);
        }

        // portable-pty would otherwise start in the home directory
        match descriptor.working_dir() {
            Some(dir) => cmd.cwd(dir),
            None => {
                if let Ok(dir) = std::env::current_dir() {
                    cmd.cwd(dir);
                }
            }
        }

        cmd
    }
}

impl Default for PtyLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for PtyLauncher {
    fn spawn(&self, descriptor: &CommandDescriptor) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let program = descriptor.program();
        let size = descriptor.terminal().unwrap_or_default();

        tracing::info!(
            "Opening PTY for {} with size {}x{}",
            program,
            size.cols,
            size.rows
        );

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| SpawnError::new(program, pty_error("failed to open PTY", e)))?;
        let PtyPair { master, slave } = pair;

        let reader = master
            .try_clone_reader()
            .map_err(|e| SpawnError::new(program, pty_error("failed to clone PTY reader", e)))?;
        let writer = master
            .take_writer()
            .map_err(|e| SpawnError::new(program, pty_error("failed to take PTY writer", e)))?;

        let mut child = slave
            .spawn_command(self.build_command(descriptor))
            .map_err(|e| SpawnError::new(program, pty_error("failed to spawn", e)))?;
        // The child holds its own copy; ours would keep the master from
        // seeing end-of-stream when the child exits
        drop(slave);

        let pid = child.process_id();
        tracing::info!("Spawned {} on PTY with PID {:?}", program, pid);

        let killer = child.clone_killer();
        let waiter = tokio::task::spawn_blocking(move || child.wait());

        Ok(Box::new(PtyProcess {
            pid,
            waiter,
            exit_code: None,
            stdin: Some(bridge_writer(writer, self.buffer_size)),
            stdout: Some(bridge_reader(reader, self.buffer_size)),
            control: Arc::new(PtyControl {
                master: Mutex::new(master),
                killer: Mutex::new(killer),
                kill_requested: AtomicBool::new(false),
            }),
        }))
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn pty_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

/// Expose a blocking PTY reader as an async reader
fn bridge_reader(mut reader: Box<dyn Read + Send>, capacity: usize) -> BoxedReader {
    let (async_side, bridge_side) = tokio::io::duplex(capacity);
    let mut bridge = SyncIoBridge::new(bridge_side);

    tokio::task::spawn_blocking(move || {
        // Linux reports EIO once the child side of the PTY is gone
        match io::copy(&mut reader, &mut bridge) {
            Ok(n) => tracing::debug!("PTY reader EOF after {} bytes", n),
            Err(e) => tracing::debug!("PTY reader closed: {}", e),
        }
    });

    Box::new(async_side)
}

/// Expose a blocking PTY writer as an async writer
fn bridge_writer(mut writer: Box<dyn Write + Send>, capacity: usize) -> BoxedWriter {
    let (async_side, bridge_side) = tokio::io::duplex(capacity);
    let mut bridge = SyncIoBridge::new(bridge_side);

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; capacity];
        loop {
            let n = match bridge.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("PTY input bridge closed: {}", e);
                    break;
                }
            };
            if let Err(e) = writer.write_all(&buf[..n]).and_then(|_| writer.flush()) {
                tracing::debug!("PTY write failed: {}", e);
                break;
            }
        }
        tracing::debug!("PTY writer exiting");
    });

    Box::new(async_side)
}

const SIGKILL: i32 = 9;

/// Exit code for a PTY child, using the `128 + signal` convention of the
/// pipe launcher.
///
/// portable-pty reports every signal death as code 1 and keeps only the
/// signal's description, visible through `Display`. The killer may deliver
/// SIGHUP before SIGKILL, so a death after a kill request is reported as
/// SIGKILL.
fn exit_code_from_pty_status(status: &ExitStatus, kill_requested: bool) -> i32 {
    if status.success() {
        return 0;
    }
    let display = status.to_string();
    let Some(signal) = display.strip_prefix("Terminated by ") else {
        return status.exit_code() as i32;
    };

    if kill_requested {
        return 128 + SIGKILL;
    }

    match signal_number(signal) {
        Some(number) => 128 + number,
        None => {
            tracing::debug!("Unrecognized signal description {:?}", signal);
            status.exit_code() as i32
        }
    }
}

/// Number of a signal from its `strsignal` description.
///
/// Only signals whose numbers are the same on Linux and macOS are listed.
fn signal_number(description: &str) -> Option<i32> {
    if let Some(number) = description.strip_prefix("Signal ") {
        return number.trim().parse().ok();
    }

    let number = match description {
        "Hangup" => 1,
        "Interrupt" => 2,
        "Quit" => 3,
        "Illegal instruction" => 4,
        "Trace/breakpoint trap" | "Trace/BPT trap" => 5,
        "Aborted" | "Abort trap" => 6,
        "Floating point exception" => 8,
        "Killed" => 9,
        "Segmentation fault" => 11,
        "Broken pipe" => 13,
        "Alarm clock" => 14,
        "Terminated" => 15,
        _ => return None,
    };
    Some(number)
}

/// A child process attached to a PTY
struct PtyProcess {
    pid: Option<u32>,
    /// Blocking wait started at spawn; awaiting it by reference survives
    /// a dropped `wait()` future
    waiter: JoinHandle<io::Result<ExitStatus>>,
    exit_code: Option<i32>,
    stdin: Option<BoxedWriter>,
    stdout: Option<BoxedReader>,
    control: Arc<PtyControl>,
}

#[async_trait]
impl ProcessHandle for PtyProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        None
    }

    fn control(&self) -> Arc<dyn ProcessControl> {
        self.control.clone()
    }

    async fn wait(&mut self) -> io::Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        let status = (&mut self.waiter)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        let code = exit_code_from_pty_status(
            &status,
            self.control.kill_requested.load(Ordering::SeqCst),
        );
        tracing::info!("PTY process {:?} exited with code {}", self.pid, code);
        self.exit_code = Some(code);
        Ok(code)
    }
}

/// Control handle for a PTY process
struct PtyControl {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    /// Set once `kill()` has been called
    kill_requested: AtomicBool,
}

impl ProcessControl for PtyControl {
    fn kill(&self) -> io::Result<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "PTY killer lock poisoned"))?;
        self.kill_requested.store(true, Ordering::SeqCst);
        killer.kill()
    }

    fn resize(&self, size: TerminalSize) -> io::Result<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "PTY master lock poisoned"))?;
        master
            .resize(pty_size(size))
            .map_err(|e| pty_error("failed to resize PTY", e))
    }
}

#[cfg(test)]
mod portable_tests {
    use super::*;

    #[test]
    fn test_new_uses_config_default_env() {
        assert_eq!(PtyLauncher::new().default_env, ExecConfig::default().default_env);
    }

    #[test]
    fn test_signal_number_from_description() {
        assert_eq!(signal_number("Killed"), Some(9));
        assert_eq!(signal_number("Terminated"), Some(15));
        assert_eq!(signal_number("Hangup"), Some(1));
        assert_eq!(signal_number("Signal 42"), Some(42));
        assert_eq!(signal_number("Something new"), None);
    }

    #[test]
    fn test_exit_codes_follow_shell_convention() {
        assert_eq!(exit_code_from_pty_status(&ExitStatus::with_exit_code(0), false), 0);
        assert_eq!(exit_code_from_pty_status(&ExitStatus::with_exit_code(3), true), 3);
        assert_eq!(
            exit_code_from_pty_status(&ExitStatus::with_signal("Terminated"), false),
            143
        );
        // The killer may have used SIGHUP first
        assert_eq!(
            exit_code_from_pty_status(&ExitStatus::with_signal("Hangup"), true),
            137
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn spawn_or_skip(descriptor: &CommandDescriptor) -> Option<Box<dyn ProcessHandle>> {
        match PtyLauncher::new().spawn(descriptor) {
            Ok(process) => Some(process),
            Err(e) => {
                eprintln!("skipping PTY test: {}", e);
                None
            }
        }
    }

    #[tokio::test]
    async fn test_terminal_size_applied_at_spawn() {
        let descriptor = CommandDescriptor::new(["stty", "size"])
            .unwrap()
            .with_terminal(TerminalSize::new(30, 100));
        let Some(mut process) = spawn_or_skip(&descriptor) else {
            return;
        };

        assert!(process.take_stderr().is_none());
        let mut output = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut output)
            .await
            .unwrap();

        assert!(output.contains("30 100"), "unexpected output: {:?}", output);
        assert_eq!(process.wait().await.unwrap(), 0);
        // A second wait returns the cached code
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kill_ends_process() {
        let descriptor = CommandDescriptor::new(["sleep", "30"])
            .unwrap()
            .with_terminal(TerminalSize::default());
        let Some(mut process) = spawn_or_skip(&descriptor) else {
            return;
        };

        process.control().kill().unwrap();
        let code = tokio::time::timeout(std::time::Duration::from_secs(10), process.wait())
            .await
            .expect("killed process should exit")
            .unwrap();
        assert_eq!(code, 137);
    }
}

//! Command runner
//!
//! [`ServerExecCommand`] executes one command over the channels supplied by
//! the transport. It moves through [`ExecState::Spawning`],
//! [`ExecState::Running`], [`ExecState::Draining`] and
//! [`ExecState::Complete`]; the exit code is written to the command channel
//! only after every byte of process output has been forwarded.

use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rx_core::config::ExecConfig;
use rx_core::traits::ProcessLauncher;
use rx_core::{BoxedWriter, CommandDescriptor, ExecChannels, ExecError, SpawnError};
use rx_protocol::{write_exit_code, EXIT_CODE_CANCELED, EXIT_CODE_SPAWN_FAILED};

use crate::forwarder::{ForwardOutcome, Forwarder, StreamRole, DEFAULT_BUFFER_SIZE};
use crate::monitor::ProcessMonitor;

/// Lifecycle of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecState {
    /// Creating the process
    Spawning,
    /// Process is running and its streams are forwarded
    Running,
    /// Process has exited; waiting for its output to be delivered
    Draining,
    /// Result has been reported
    Complete,
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecState::Spawning => "spawning",
            ExecState::Running => "running",
            ExecState::Draining => "draining",
            ExecState::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// What happened to a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReport {
    /// Code written to the command channel
    pub exit_code: i32,
    /// Whether the command was canceled through its [`ExecHandle`]
    pub canceled: bool,
    /// How stdout forwarding ended; `None` if the process never started
    pub stdout: Option<ForwardOutcome>,
    /// How stderr forwarding ended; `None` if stderr was merged or the
    /// process never started
    pub stderr: Option<ForwardOutcome>,
    /// Whether the exit code reached the command channel
    pub result_delivered: bool,
    /// Control directives applied while the process ran
    pub directives_applied: usize,
}

impl ExecReport {
    fn spawn_failed(result_delivered: bool) -> Self {
        Self {
            exit_code: EXIT_CODE_SPAWN_FAILED,
            canceled: false,
            stdout: None,
            stderr: None,
            result_delivered,
            directives_applied: 0,
        }
    }
}

/// Executes a command and streams its stdio over transport channels
pub struct ServerExecCommand {
    descriptor: CommandDescriptor,
    channels: ExecChannels,
    launcher: Arc<dyn ProcessLauncher>,
    buffer_size: usize,
}

impl ServerExecCommand {
    /// Create a runner for `descriptor` over `channels`
    pub fn new(
        descriptor: CommandDescriptor,
        channels: ExecChannels,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            descriptor,
            channels,
            launcher,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Apply settings from configuration
    pub fn with_config(self, config: &ExecConfig) -> Self {
        self.with_buffer_size(config.buffer_size)
    }

    /// Set the forwarder buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Start executing on a new task.
    ///
    /// Returns immediately. Dropping the handle does not stop the command.
    pub fn exec(self) -> ExecHandle {
        let (state_tx, state_rx) = watch::channel(ExecState::Spawning);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(self.run(state_tx, cancel.clone()));

        ExecHandle {
            state: state_rx,
            cancel,
            task,
        }
    }

    async fn run(self, state: watch::Sender<ExecState>, cancel: CancellationToken) -> ExecReport {
        let Self {
            descriptor,
            channels,
            launcher,
            buffer_size,
        } = self;

        let (command_in, mut command_out) = channels.command.into_split();
        let (stdio_in, stdio_out) = channels.stdio.into_split();
        let stderr_out = channels.stderr.map(|channel| channel.into_split().1);

        tracing::info!("Executing: {}", descriptor);

        let mut process = match launcher.spawn(&descriptor) {
            Ok(process) => process,
            Err(err) => {
                tracing::warn!("{}", err);
                report_spawn_failure(&err, stdio_out, stderr_out).await;
                let delivered = deliver_result(&mut command_out, EXIT_CODE_SPAWN_FAILED).await;
                state.send_replace(ExecState::Complete);
                return ExecReport::spawn_failed(delivered);
            }
        };

        let control = process.control();
        state.send_replace(ExecState::Running);

        let stdout_source = process
            .take_stdout()
            .unwrap_or_else(|| Box::new(tokio::io::empty()));
        let stdout_forwarder = Forwarder::new(StreamRole::Stdout, stdout_source, stdio_out)
            .with_buffer_size(buffer_size)
            .spawn();

        let stderr_forwarder = match process.take_stderr() {
            Some(source) => {
                let destination: BoxedWriter = match stderr_out {
                    Some(output) => output,
                    None => {
                        tracing::debug!("No stderr channel, discarding process stderr");
                        Box::new(tokio::io::sink())
                    }
                };
                Some(
                    Forwarder::new(StreamRole::Stderr, source, destination)
                        .with_buffer_size(buffer_size)
                        .spawn(),
                )
            }
            None => {
                // Merged into stdout; nothing will ever be written here
                if let Some(mut output) = stderr_out {
                    if let Err(e) = output.shutdown().await {
                        tracing::trace!("stderr channel close failed: {}", e);
                    }
                }
                None
            }
        };

        let stdin_cancel = CancellationToken::new();
        if let Some(sink) = process.take_stdin() {
            Forwarder::new(StreamRole::Stdin, stdio_in, sink)
                .with_buffer_size(buffer_size)
                .with_cancellation(stdin_cancel.clone())
                .spawn();
        }

        let monitor_cancel = CancellationToken::new();
        let monitor = ProcessMonitor::new(command_in, Arc::clone(&control))
            .with_cancellation(monitor_cancel.clone())
            .spawn();

        let exited = tokio::select! {
            biased;
            status = process.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let (waited, canceled) = match exited {
            Some(status) => (status, false),
            None => {
                tracing::info!("Command canceled, killing process {:?}", process.id());
                if let Err(e) = control.kill() {
                    tracing::warn!("Failed to kill process: {}", e);
                }
                (process.wait().await, true)
            }
        };

        let exit_code = match waited {
            Ok(_) if canceled => EXIT_CODE_CANCELED,
            Ok(code) => code,
            Err(e) => {
                tracing::warn!("Failed to wait for process: {}", e);
                if canceled {
                    EXIT_CODE_CANCELED
                } else {
                    EXIT_CODE_SPAWN_FAILED
                }
            }
        };

        state.send_replace(ExecState::Draining);
        tracing::debug!("Process finished, draining output");

        let stdout = stdout_forwarder.wait_for().await;
        let stderr = match &stderr_forwarder {
            Some(handle) => Some(handle.wait_for().await),
            None => None,
        };

        // Nothing reads the client's input any more
        stdin_cancel.cancel();

        let result_delivered = deliver_result(&mut command_out, exit_code).await;

        monitor_cancel.cancel();
        let directives_applied = match monitor.await {
            Ok(report) => {
                tracing::debug!("Monitor stopped: {:?}", report.exit);
                report.applied
            }
            Err(e) => {
                tracing::warn!("Monitor task failed: {}", e);
                0
            }
        };

        state.send_replace(ExecState::Complete);
        tracing::info!("Command '{}' completed with exit code {}", descriptor.program(), exit_code);

        ExecReport {
            exit_code,
            canceled,
            stdout: Some(stdout),
            stderr,
            result_delivered,
            directives_applied,
        }
    }
}

/// Tell the client why the process did not start and close its outputs
async fn report_spawn_failure(
    err: &SpawnError,
    mut stdio_out: BoxedWriter,
    stderr_out: Option<BoxedWriter>,
) {
    let message = format!("{}\n", err);

    let written = match stderr_out {
        Some(mut output) => {
            let written = write_message(&mut output, &message).await;
            close(&mut output).await;
            written
        }
        None => write_message(&mut stdio_out, &message).await,
    };
    if let Err(e) = written {
        tracing::debug!("Could not report spawn failure to client: {}", e);
    }

    close(&mut stdio_out).await;
}

async fn write_message(output: &mut BoxedWriter, message: &str) -> std::io::Result<()> {
    output.write_all(message.as_bytes()).await?;
    output.flush().await
}

async fn close(output: &mut BoxedWriter) {
    if let Err(e) = output.shutdown().await {
        tracing::trace!("Channel close failed: {}", e);
    }
}

/// Write the exit code and close the command channel output
async fn deliver_result(output: &mut BoxedWriter, code: i32) -> bool {
    let delivered = match write_exit_code(output, code).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to deliver exit code {}: {}", code, e);
            false
        }
    };
    close(output).await;
    delivered
}

/// Handle to a running command
pub struct ExecHandle {
    state: watch::Receiver<ExecState>,
    cancel: CancellationToken,
    task: JoinHandle<ExecReport>,
}

impl ExecHandle {
    /// Current lifecycle state
    pub fn state(&self) -> ExecState {
        *self.state.borrow()
    }

    /// Wait until the command has reached `target` or a later state
    pub async fn reached(&self, target: ExecState) -> ExecState {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|current| *current >= target)
            .await
            .map(|current| *current);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Kill the process and report [`EXIT_CODE_CANCELED`].
    ///
    /// Output is still drained before the result is written. Has no effect
    /// once the process has exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the command to complete
    pub async fn wait(self) -> Result<ExecReport, ExecError> {
        self.task
            .await
            .map_err(|e| ExecError::TaskFailed(e.to_string()))
    }
}

impl fmt::Debug for ExecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

//! Pipe-based processes

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio_util::io::{ReaderStream, StreamReader};

use rx_core::traits::{ProcessControl, ProcessHandle, ProcessLauncher};
use rx_core::{BoxedReader, BoxedWriter, CommandDescriptor, EnvMode, SpawnError};
use rx_protocol::TerminalSize;

use super::exit_code_from_status;

/// Spawns processes with piped stdin, stdout and stderr
#[derive(Debug, Clone, Default)]
pub struct PipeLauncher;

impl PipeLauncher {
    /// Create a new pipe launcher
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for PipeLauncher {
    fn spawn(&self, descriptor: &CommandDescriptor) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let mut cmd = Command::new(descriptor.program());
        cmd.args(descriptor.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if descriptor.env_mode() == EnvMode::Replace {
            cmd.env_clear();
        }
        cmd.envs(descriptor.env().iter().map(|(k, v)| (k, v)));

        if let Some(dir) = descriptor.working_dir() {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::new(descriptor.program(), e))?;

        tracing::info!("Spawned {} with PID {:?}", descriptor.program(), child.id());

        let stdin = child.stdin.take().map(|s| Box::new(s) as BoxedWriter);
        let stdout = child.stdout.take().map(|s| Box::new(s) as BoxedReader);
        let stderr = child.stderr.take().map(|s| Box::new(s) as BoxedReader);

        let (stdout, stderr) = if descriptor.redirect_stderr() {
            (Some(merge_readers(stdout, stderr)), None)
        } else {
            (stdout, stderr)
        };

        Ok(Box::new(PipeProcess {
            child,
            stdin,
            stdout,
            stderr,
            kill: Arc::new(Notify::new()),
        }))
    }
}

/// Interleave two readers chunk by chunk; ends when both have ended
fn merge_readers(first: Option<BoxedReader>, second: Option<BoxedReader>) -> BoxedReader {
    let first = first.unwrap_or_else(|| Box::new(tokio::io::empty()));
    let second = second.unwrap_or_else(|| Box::new(tokio::io::empty()));

    let merged = futures::stream::select(ReaderStream::new(first), ReaderStream::new(second));
    Box::new(StreamReader::new(merged))
}

/// A child process with pipes
struct PipeProcess {
    child: Child,
    stdin: Option<BoxedWriter>,
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    kill: Arc<Notify>,
}

#[async_trait]
impl ProcessHandle for PipeProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    fn control(&self) -> Arc<dyn ProcessControl> {
        Arc::new(PipeControl {
            kill: Arc::clone(&self.kill),
        })
    }

    async fn wait(&mut self) -> io::Result<i32> {
        // Kill requests arrive as notifications so the child is only ever
        // touched by the waiting task
        loop {
            tokio::select! {
                status = self.child.wait() => {
                    let code = exit_code_from_status(status?);
                    tracing::info!("Process exited with code {}", code);
                    return Ok(code);
                }
                _ = self.kill.notified() => {
                    tracing::debug!("Killing process {:?}", self.child.id());
                    if let Err(e) = self.child.start_kill() {
                        tracing::debug!("Kill failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Control handle for a piped process
struct PipeControl {
    kill: Arc<Notify>,
}

impl ProcessControl for PipeControl {
    fn kill(&self) -> io::Result<()> {
        self.kill.notify_one();
        Ok(())
    }

    fn resize(&self, _size: TerminalSize) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process has no terminal",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let descriptor = CommandDescriptor::new(["/definitely/not/a/program"]).unwrap();
        let err = PipeLauncher::new().spawn(&descriptor).err().unwrap();
        assert_eq!(err.program, "/definitely/not/a/program");
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_merged_stderr() {
        let descriptor = CommandDescriptor::new(["sh", "-c", "echo out; echo err >&2"])
            .unwrap()
            .with_redirect_stderr(true);
        let mut process = PipeLauncher::new().spawn(&descriptor).unwrap();

        assert!(process.take_stderr().is_none());
        let mut stdout = process.take_stdout().unwrap();
        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();

        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kill_before_wait() {
        let descriptor = CommandDescriptor::new(["sleep", "30"]).unwrap();
        let mut process = PipeLauncher::new().spawn(&descriptor).unwrap();

        let control = process.control();
        control.kill().unwrap();
        assert_eq!(process.wait().await.unwrap(), 137);
    }

    #[tokio::test]
    async fn test_resize_unsupported() {
        let descriptor = CommandDescriptor::new(["true"]).unwrap();
        let mut process = PipeLauncher::new().spawn(&descriptor).unwrap();

        let err = process
            .control()
            .resize(TerminalSize::default())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_env() {
        let descriptor = CommandDescriptor::new(["/bin/sh", "-c", "echo \"[$HOME][$ONLY]\""])
            .unwrap()
            .with_env_mode(EnvMode::Replace)
            .with_env("ONLY", "this");
        let mut process = PipeLauncher::new().spawn(&descriptor).unwrap();

        let mut output = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut output)
            .await
            .unwrap();
        assert_eq!(output, "[][this]\n");
        assert_eq!(process.wait().await.unwrap(), 0);
    }
}

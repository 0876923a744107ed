//! Core domain types

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ExecError;
use rx_protocol::TerminalSize;

/// Boxed input half of a channel or process stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed output half of a channel or process stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A duplex byte-stream endpoint supplied by the transport.
///
/// The execution core reads from `input` and writes to `output`. It never
/// closes a channel it does not write to.
pub struct StreamChannel {
    input: BoxedReader,
    output: BoxedWriter,
}

impl StreamChannel {
    /// Create a channel from separate read and write halves
    pub fn new<R, W>(input: R, output: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    /// Create a channel from a single bidirectional stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (input, output) = tokio::io::split(stream);
        Self::new(input, output)
    }

    /// Split into the input and output halves
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        (self.input, self.output)
    }
}

impl fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel").finish_non_exhaustive()
    }
}

/// The channels of one command invocation
#[derive(Debug)]
pub struct ExecChannels {
    /// Control directives in, exit code out
    pub command: StreamChannel,
    /// Process stdin in, process stdout out
    pub stdio: StreamChannel,
    /// Process stderr out, when kept apart from stdout
    pub stderr: Option<StreamChannel>,
}

impl ExecChannels {
    /// Channels without a separate stderr channel
    pub fn new(command: StreamChannel, stdio: StreamChannel) -> Self {
        Self {
            command,
            stdio,
            stderr: None,
        }
    }

    /// Attach a separate stderr channel
    pub fn with_stderr(mut self, stderr: StreamChannel) -> Self {
        self.stderr = Some(stderr);
        self
    }
}

/// How descriptor environment entries combine with the inherited environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    /// Overlay entries on the inherited environment
    #[default]
    Append,
    /// Start from an empty environment
    Replace,
}

/// Immutable description of a command to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorParts")]
pub struct CommandDescriptor {
    argv: Vec<String>,
    env: Vec<(String, String)>,
    env_mode: EnvMode,
    working_dir: Option<PathBuf>,
    redirect_stderr: bool,
    terminal: Option<TerminalSize>,
}

#[derive(Deserialize)]
struct DescriptorParts {
    argv: Vec<String>,
    #[serde(default)]
    env: Vec<(String, String)>,
    #[serde(default)]
    env_mode: EnvMode,
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    redirect_stderr: bool,
    #[serde(default)]
    terminal: Option<TerminalSize>,
}

impl TryFrom<DescriptorParts> for CommandDescriptor {
    type Error = ExecError;

    fn try_from(parts: DescriptorParts) -> Result<Self, Self::Error> {
        let mut descriptor = CommandDescriptor::new(parts.argv)?;
        descriptor.env = parts.env;
        descriptor.env_mode = parts.env_mode;
        descriptor.working_dir = parts.working_dir;
        descriptor.redirect_stderr = parts.redirect_stderr;
        descriptor.terminal = parts.terminal;
        Ok(descriptor)
    }
}

impl CommandDescriptor {
    /// Create a descriptor from an argument vector.
    ///
    /// The first element is the program. An empty vector or an empty
    /// program name is rejected.
    pub fn new<I, S>(argv: I) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        match argv.first() {
            None => {
                return Err(ExecError::InvalidDescriptor(
                    "argument vector is empty".to_string(),
                ))
            }
            Some(program) if program.is_empty() => {
                return Err(ExecError::InvalidDescriptor(
                    "program name is empty".to_string(),
                ))
            }
            Some(_) => {}
        }

        Ok(Self {
            argv,
            env: Vec::new(),
            env_mode: EnvMode::default(),
            working_dir: None,
            redirect_stderr: false,
            terminal: None,
        })
    }

    /// Add an environment entry
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set how the environment entries are applied
    pub fn with_env_mode(mut self, mode: EnvMode) -> Self {
        self.env_mode = mode;
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Merge stderr into stdout
    pub fn with_redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    /// Request a pseudo-terminal of the given initial size
    pub fn with_terminal(mut self, size: TerminalSize) -> Self {
        self.terminal = Some(size);
        self
    }

    /// Program to run
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments after the program
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// Full argument vector
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment entries
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Environment mode
    pub fn env_mode(&self) -> EnvMode {
        self.env_mode
    }

    /// Working directory, if any
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Whether stderr is merged into stdout
    pub fn redirect_stderr(&self) -> bool {
        self.redirect_stderr
    }

    /// Requested terminal size, if a pseudo-terminal is wanted
    pub fn terminal(&self) -> Option<TerminalSize> {
        self.terminal
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

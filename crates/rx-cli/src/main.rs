//! rexec CLI
//!
//! Runs one command through the rexec execution core:
//! - stdin/stdout/stderr are forwarded to and from the process
//! - Ctrl-C and `--timeout` kill it through the control channel
//! - with `--pty` the command gets a pseudo-terminal that follows the local
//!   window size

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rexec::local::{process_exit_code, run_local, LocalOptions, EXIT_STATUS_NO_CODE};
use rexec::output::{print_error, print_warning};
use rexec::terminal;
use rx_core::config::{self, ExecConfig};
use rx_core::{CommandDescriptor, EnvMode};

#[derive(Parser)]
#[command(name = "rexec")]
#[command(author, version, about = "Run a command and stream its stdio through the rexec execution core")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, env = "REXEC_LOG")]
    log_level: Option<String>,

    /// Run the command on a pseudo-terminal
    #[arg(long)]
    pty: bool,

    /// Send the command's stderr to stdout
    #[arg(long)]
    merge_stderr: bool,

    /// Working directory for the command
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Set an environment variable for the command
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Start the command with an empty environment
    #[arg(long)]
    clear_env: bool,

    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let status = match run(cli).await {
        Ok(code) => process_exit_code(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            EXIT_STATUS_NO_CODE
        }
    };

    // Stdin may still be parked on a blocking read; exit without waiting for it
    std::process::exit(status);
}

async fn run(cli: Cli) -> Result<i32> {
    let (config, config_warning) = load_exec_config(cli.config.as_deref())?;

    let log_level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(log_level),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Some(warning) = config_warning {
        print_warning(&warning);
    }

    config.validate().context("Invalid configuration")?;

    let descriptor = build_descriptor(&cli, &config)?;
    let options = LocalOptions {
        timeout: cli.timeout.map(Duration::from_secs),
    };

    run_local(descriptor, &config, options).await
}

/// Load the configuration, falling back to defaults when the default file
/// is missing or unreadable
fn load_exec_config(path: Option<&Path>) -> Result<(ExecConfig, Option<String>)> {
    if let Some(path) = path {
        let config: ExecConfig = config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        return Ok((config, None));
    }

    let default_path = config::default_config_path();
    if !default_path.exists() {
        return Ok((ExecConfig::default(), None));
    }

    match config::load_config(&default_path) {
        Ok(config) => Ok((config, None)),
        Err(e) => Ok((
            ExecConfig::default(),
            Some(format!(
                "Failed to load config from {:?}: {}; using defaults",
                default_path, e
            )),
        )),
    }
}

fn build_descriptor(cli: &Cli, config: &ExecConfig) -> Result<CommandDescriptor> {
    let mut descriptor = CommandDescriptor::new(cli.command.iter().cloned())?;

    if cli.clear_env {
        descriptor = descriptor.with_env_mode(EnvMode::Replace);
    }
    for (key, value) in &cli.env {
        descriptor = descriptor.with_env(key, value);
    }

    if let Some(dir) = &cli.cwd {
        if !dir.is_dir() {
            bail!("Working directory {:?} does not exist", dir);
        }
        descriptor = descriptor.with_working_dir(dir);
    }

    descriptor = descriptor.with_redirect_stderr(cli.merge_stderr);

    if cli.pty {
        let size = terminal::current_size().unwrap_or(config.terminal_size);
        descriptor = descriptor.with_terminal(size);
    }

    Ok(descriptor)
}

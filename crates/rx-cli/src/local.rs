//! Local execution
//!
//! Wires the local terminal to a `ServerExecCommand`: stdin and stdout form
//! the stdio channel, stderr the stderr channel, and an in-process duplex
//! pipe the command channel. Interrupts, the timeout and window size
//! changes become control directives on that pipe.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use rx_core::config::ExecConfig;
use rx_core::{CommandDescriptor, ExecChannels, StreamChannel};
use rx_exec::{NativeLauncher, ServerExecCommand};
use rx_protocol::{read_exit_code, Directive, DirectiveCodec, RESULT_SIZE};

use crate::output::print_warning;
use crate::terminal::{RawModeGuard, ResizeEvents};

/// Status used when the command reports a negative exit code
pub const EXIT_STATUS_NO_CODE: i32 = 255;

/// Options that only affect the local side
#[derive(Debug, Clone, Default)]
pub struct LocalOptions {
    /// Send `Kill` once this much time has passed
    pub timeout: Option<Duration>,
}

/// Run `descriptor` and return the exit code reported on the command channel
pub async fn run_local(
    descriptor: CommandDescriptor,
    config: &ExecConfig,
    options: LocalOptions,
) -> Result<i32> {
    let interactive = descriptor.terminal().is_some();
    let _raw_mode = if interactive {
        RawModeGuard::enable().unwrap_or_else(|e| {
            print_warning(&format!("Could not switch terminal to raw mode: {}", e));
            None
        })
    } else {
        None
    };

    let (command_client, command_server) =
        tokio::io::duplex(config.buffer_size.max(RESULT_SIZE));

    let channels = ExecChannels::new(
        StreamChannel::from_stream(command_server),
        StreamChannel::new(tokio::io::stdin(), tokio::io::stdout()),
    )
    .with_stderr(StreamChannel::new(tokio::io::empty(), tokio::io::stderr()));

    let launcher = Arc::new(NativeLauncher::from_config(config));
    let handle = ServerExecCommand::new(descriptor, channels, launcher)
        .with_config(config)
        .exec();

    let (mut results, directives) = tokio::io::split(command_client);
    let controls = tokio::spawn(send_controls(
        FramedWrite::new(directives, DirectiveCodec::new()),
        options,
        interactive,
    ));

    let code = read_exit_code(&mut results)
        .await
        .context("Command channel closed before the exit code arrived")?;
    controls.abort();

    let report = handle.wait().await?;
    tracing::debug!("Command report: {:?}", report);

    Ok(code)
}

/// Translate local events into control directives until the channel closes
async fn send_controls<W>(
    mut directives: FramedWrite<W, DirectiveCodec>,
    options: LocalOptions,
    forward_resize: bool,
) where
    W: AsyncWrite + Unpin,
{
    let deadline = async {
        match options.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut timed_out = false;
    let mut interrupts = true;
    let mut resizes = ResizeEvents::new(forward_resize);

    loop {
        let directive = tokio::select! {
            result = tokio::signal::ctrl_c(), if interrupts => match result {
                Ok(()) => {
                    tracing::info!("Interrupted, killing command");
                    Directive::Kill
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                    interrupts = false;
                    continue;
                }
            },
            _ = &mut deadline, if !timed_out => {
                timed_out = true;
                print_warning("Timed out, killing command");
                Directive::Kill
            }
            size = resizes.next() => Directive::resize(size),
        };

        if let Err(e) = directives.send(directive).await {
            tracing::debug!("Control channel closed: {}", e);
            break;
        }
    }
}

/// Map a reported exit code to a process exit status
pub fn process_exit_code(code: i32) -> i32 {
    if code < 0 {
        EXIT_STATUS_NO_CODE
    } else {
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_codes_map_to_255() {
        assert_eq!(process_exit_code(0), 0);
        assert_eq!(process_exit_code(137), 137);
        assert_eq!(process_exit_code(-1), 255);
        assert_eq!(process_exit_code(-2), 255);
    }

    #[tokio::test]
    async fn test_timeout_sends_kill() {
        let (client, mut server) = tokio::io::duplex(64);
        let options = LocalOptions {
            timeout: Some(Duration::from_millis(10)),
        };
        let controls = tokio::spawn(send_controls(
            FramedWrite::new(client, DirectiveCodec::new()),
            options,
            false,
        ));

        let mut tag = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut tag)
            .await
            .unwrap();
        assert_eq!(tag[0], Directive::Kill.tag().as_u8());
        controls.abort();
    }
}

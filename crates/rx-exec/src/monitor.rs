//! Control directive monitor
//!
//! Reads directives from the input side of the command channel and applies
//! them to the running process. The monitor stops when the stream closes,
//! when an unknown directive arrives, or when the runner cancels it after
//! the result has been reported.

use std::io;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use rx_core::traits::ProcessControl;
use rx_protocol::{Directive, DirectiveCodec, ProtocolError, TerminalSize};

/// Why the monitor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The control stream closed or failed
    StreamClosed,
    /// An undefined directive tag arrived
    ProtocolError,
    /// The runner no longer needs the monitor
    Cancelled,
}

/// Summary of a finished monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    /// Directives that were passed to the process control
    pub applied: usize,
    /// Why the monitor stopped
    pub exit: MonitorExit,
}

/// Applies control directives to a process
pub struct ProcessMonitor<R> {
    directives: FramedRead<R, DirectiveCodec>,
    control: Arc<dyn ProcessControl>,
    cancel: CancellationToken,
}

impl<R> ProcessMonitor<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a monitor reading directives from `input`
    pub fn new(input: R, control: Arc<dyn ProcessControl>) -> Self {
        Self {
            directives: FramedRead::new(input, DirectiveCodec::new()),
            control,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop monitoring when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Apply directives until the stream ends
    pub async fn run(mut self) -> MonitorReport {
        let mut applied = 0;

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break MonitorExit::Cancelled,
                next = self.directives.next() => next,
            };

            match next {
                None => {
                    tracing::debug!("Control stream closed");
                    break MonitorExit::StreamClosed;
                }
                Some(Ok(directive)) => {
                    if self.apply(directive) {
                        applied += 1;
                    }
                }
                Some(Err(ProtocolError::UnknownDirective(tag))) => {
                    tracing::warn!(
                        "Unknown control directive 0x{:02x}, no longer reading control stream",
                        tag
                    );
                    break MonitorExit::ProtocolError;
                }
                Some(Err(e)) => {
                    tracing::debug!("Control stream ended: {}", e);
                    break MonitorExit::StreamClosed;
                }
            }
        };

        MonitorReport { applied, exit }
    }

    /// Apply a single directive; returns false if it was skipped
    fn apply(&self, directive: Directive) -> bool {
        match directive {
            Directive::Kill => {
                tracing::info!("Kill requested on control channel");
                if let Err(e) = self.control.kill() {
                    tracing::warn!("Failed to kill process: {}", e);
                }
                true
            }
            Directive::SetTerminalSize { cols, rows } => {
                let Some(size) = TerminalSize::from_wire(cols, rows) else {
                    tracing::warn!("Ignoring invalid terminal size {}x{}", cols, rows);
                    return false;
                };

                tracing::debug!("Resizing terminal to {}x{}", size.cols, size.rows);
                match self.control.resize(size) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                        tracing::debug!("Resize not supported: {}", e);
                    }
                    Err(e) => tracing::warn!("Failed to resize terminal: {}", e),
                }
                true
            }
        }
    }
}

impl<R> ProcessMonitor<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Run the monitor on its own task
    pub fn spawn(self) -> JoinHandle<MonitorReport> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingControl {
        kills: AtomicUsize,
        resizes: Mutex<Vec<TerminalSize>>,
    }

    impl ProcessControl for RecordingControl {
        fn kill(&self) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn resize(&self, size: TerminalSize) -> io::Result<()> {
            self.resizes.lock().unwrap().push(size);
            Ok(())
        }
    }

    fn resize_bytes(cols: i32, rows: i32) -> Vec<u8> {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(&cols.to_be_bytes());
        bytes.extend_from_slice(&rows.to_be_bytes());
        bytes.extend_from_slice(&1024i32.to_be_bytes());
        bytes.extend_from_slice(&768i32.to_be_bytes());
        bytes
    }

    #[tokio::test]
    async fn test_resize_passes_cols_and_rows_only() {
        let control = Arc::new(RecordingControl::default());
        let input = resize_bytes(80, 24);

        let report = ProcessMonitor::new(&input[..], control.clone()).run().await;

        assert_eq!(
            report,
            MonitorReport {
                applied: 1,
                exit: MonitorExit::StreamClosed
            }
        );
        assert_eq!(
            *control.resizes.lock().unwrap(),
            vec![TerminalSize { cols: 80, rows: 24 }]
        );
        assert_eq!(control.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_kill_after_resize() {
        let control = Arc::new(RecordingControl::default());
        let mut input = resize_bytes(132, 43);
        input.push(0x01);

        let report = ProcessMonitor::new(&input[..], control.clone()).run().await;

        assert_eq!(report.applied, 2);
        assert_eq!(control.kills.load(Ordering::SeqCst), 1);
        assert_eq!(control.resizes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_directive_stops_monitor() {
        let control = Arc::new(RecordingControl::default());
        // The kill after the bad tag must not be applied
        let input: &[u8] = &[0x09, 0x01];

        let report = ProcessMonitor::new(input, control.clone()).run().await;

        assert_eq!(report.exit, MonitorExit::ProtocolError);
        assert_eq!(report.applied, 0);
        assert_eq!(control.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_size_is_skipped_and_stream_stays_aligned() {
        let control = Arc::new(RecordingControl::default());
        let mut input = resize_bytes(-5, 24);
        input.push(0x01);

        let report = ProcessMonitor::new(&input[..], control.clone()).run().await;

        assert_eq!(report.applied, 1);
        assert!(control.resizes.lock().unwrap().is_empty());
        assert_eq!(control.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_idle_monitor() {
        let control = Arc::new(RecordingControl::default());
        let (mut client, server) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let monitor = ProcessMonitor::new(server, control.clone())
            .with_cancellation(token.clone())
            .spawn();

        client.write_all(&[0x01]).await.unwrap();
        // Give the monitor a chance to apply the kill before cancelling
        for _ in 0..100 {
            if control.kills.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();

        let report = timeout(Duration::from_secs(5), monitor)
            .await
            .expect("monitor should stop after cancellation")
            .unwrap();
        assert_eq!(report.exit, MonitorExit::Cancelled);
        assert_eq!(report.applied, 1);
    }

    #[tokio::test]
    async fn test_truncated_directive_ends_quietly() {
        let control = Arc::new(RecordingControl::default());
        let input: &[u8] = &[0x02, 0, 0];

        let report = ProcessMonitor::new(input, control.clone()).run().await;

        assert_eq!(report.exit, MonitorExit::StreamClosed);
        assert_eq!(report.applied, 0);
    }
}

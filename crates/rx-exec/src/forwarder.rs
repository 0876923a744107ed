//! Stream forwarding
//!
//! A forwarder copies bytes from one stream to another until the source is
//! exhausted, an I/O error occurs, or it is cancelled. Every non-empty read
//! is written and flushed immediately so interactive sessions see output
//! without delay. When it stops, the destination is shut down and the
//! completion signal resolves.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default read buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Which process stream a forwarder carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Client input to process stdin
    Stdin,
    /// Process stdout to client
    Stdout,
    /// Process stderr to client
    Stderr,
}

impl StreamRole {
    /// Name of the stream
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamRole::Stdin => "stdin",
            StreamRole::Stdout => "stdout",
            StreamRole::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a forwarder stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Source reached end of stream
    Ended {
        /// Bytes delivered
        bytes: u64,
    },
    /// A read or write failed
    Failed {
        /// Bytes delivered before the failure
        bytes: u64,
        /// Kind of the I/O error
        kind: io::ErrorKind,
    },
    /// Stopped through the cancellation token
    Cancelled {
        /// Bytes delivered before cancellation
        bytes: u64,
    },
}

impl ForwardOutcome {
    /// Bytes delivered to the destination
    pub fn bytes(&self) -> u64 {
        match self {
            ForwardOutcome::Ended { bytes }
            | ForwardOutcome::Failed { bytes, .. }
            | ForwardOutcome::Cancelled { bytes } => *bytes,
        }
    }

    /// Whether the forwarder stopped on an I/O error
    pub fn is_failed(&self) -> bool {
        matches!(self, ForwardOutcome::Failed { .. })
    }
}

/// Copies one stream into another
pub struct Forwarder<R, W> {
    role: StreamRole,
    source: R,
    destination: W,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl<R, W> Forwarder<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a forwarder from `source` to `destination`
    pub fn new(role: StreamRole, source: R, destination: W) -> Self {
        Self {
            role,
            source,
            destination,
            buffer_size: DEFAULT_BUFFER_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the read buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Stop forwarding when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Forward until the source ends, an error occurs, or cancellation
    pub async fn run(mut self) -> ForwardOutcome {
        let role = self.role;
        let mut buf = vec![0u8; self.buffer_size];
        let mut bytes: u64 = 0;

        let outcome = loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break ForwardOutcome::Cancelled { bytes },
                read = self.source.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => break ForwardOutcome::Ended { bytes },
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("{} read failed: {}", role, e);
                    break ForwardOutcome::Failed {
                        bytes,
                        kind: e.kind(),
                    };
                }
            };

            let written = async {
                self.destination.write_all(&buf[..n]).await?;
                self.destination.flush().await
            }
            .await;

            if let Err(e) = written {
                tracing::debug!("{} write failed: {}", role, e);
                break ForwardOutcome::Failed {
                    bytes,
                    kind: e.kind(),
                };
            }

            bytes += n as u64;
            tracing::trace!("{} forwarded {} bytes", role, n);
        };

        if let Err(e) = self.destination.shutdown().await {
            tracing::trace!("{} destination close failed: {}", role, e);
        }

        tracing::debug!("{} forwarder finished: {:?}", role, outcome);
        outcome
    }
}

impl<R, W> Forwarder<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Run the forwarder on its own task
    pub fn spawn(self) -> ForwarderHandle {
        let role = self.role;
        let (done_tx, done_rx) = watch::channel(None);

        tokio::spawn(async move {
            let outcome = self.run().await;
            done_tx.send_replace(Some(outcome));
        });

        ForwarderHandle {
            role,
            done: done_rx,
        }
    }
}

/// Completion handle for a spawned forwarder
#[derive(Debug, Clone)]
pub struct ForwarderHandle {
    role: StreamRole,
    done: watch::Receiver<Option<ForwardOutcome>>,
}

impl ForwarderHandle {
    /// Stream this forwarder carries
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Whether the forwarder is still copying
    pub fn is_running(&self) -> bool {
        self.done.borrow().is_none()
    }

    /// Wait until the forwarder has stopped.
    ///
    /// May be called from any number of tasks, before or after completion.
    pub async fn wait_for(&self) -> ForwardOutcome {
        let mut done = self.done.clone();
        let outcome = done.wait_for(Option::is_some).await.ok().and_then(|o| *o);

        // The task only drops its sender without a value if it panicked
        outcome.unwrap_or(ForwardOutcome::Failed {
            bytes: 0,
            kind: io::ErrorKind::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_forwards_until_eof_and_closes_destination() {
        let source: &[u8] = b"hello, forwarder";
        let (dest, mut peer) = tokio::io::duplex(64);

        let outcome = Forwarder::new(StreamRole::Stdout, source, dest).run().await;
        assert_eq!(outcome, ForwardOutcome::Ended { bytes: 16 });

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello, forwarder");
    }

    #[tokio::test]
    async fn test_small_buffer_still_delivers_everything() {
        let source: &[u8] = b"0123456789abcdef";
        let (dest, mut peer) = tokio::io::duplex(64);

        let handle = Forwarder::new(StreamRole::Stderr, source, dest)
            .with_buffer_size(3)
            .spawn();

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"0123456789abcdef");
        assert_eq!(handle.wait_for().await.bytes(), 16);
    }

    #[tokio::test]
    async fn test_closed_destination_ends_forwarder() {
        let (mut writer, source) = tokio::io::duplex(64);
        let (dest, peer) = tokio::io::duplex(64);
        drop(peer);

        let handle = Forwarder::new(StreamRole::Stdout, source, dest).spawn();
        writer.write_all(b"nobody is listening").await.unwrap();

        let outcome = timeout(Duration::from_secs(5), handle.wait_for())
            .await
            .expect("forwarder should stop when its destination is closed");
        assert!(outcome.is_failed());
        assert_eq!(outcome.bytes(), 0);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_pending_read() {
        let (_writer, source) = tokio::io::duplex(64);
        let (dest, mut peer) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let handle = Forwarder::new(StreamRole::Stdin, source, dest)
            .with_cancellation(token.clone())
            .spawn();
        assert!(handle.is_running());

        token.cancel();
        let outcome = timeout(Duration::from_secs(5), handle.wait_for())
            .await
            .expect("cancelled forwarder should finish");
        assert_eq!(outcome, ForwardOutcome::Cancelled { bytes: 0 });

        // Destination is still closed on cancellation
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_from_several_waiters() {
        let (mut writer, source) = tokio::io::duplex(64);
        let (dest, mut peer) = tokio::io::duplex(64);

        let handle = Forwarder::new(StreamRole::Stdout, source, dest).spawn();
        let first = handle.clone();
        let second = handle.clone();
        let waiters = tokio::spawn(async move {
            let a = first.wait_for().await;
            let b = second.wait_for().await;
            (a, b)
        });

        writer.write_all(b"abc").await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abc");

        let (a, b) = waiters.await.unwrap();
        assert_eq!(a, ForwardOutcome::Ended { bytes: 3 });
        assert_eq!(a, b);
        // Waiting again after completion returns immediately
        assert_eq!(handle.wait_for().await, a);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(StreamRole::Stdin.to_string(), "stdin");
        assert_eq!(StreamRole::Stdout.to_string(), "stdout");
        assert_eq!(StreamRole::Stderr.to_string(), "stderr");
    }
}

//! Local terminal handling

use std::io::{self, IsTerminal};

use rx_protocol::TerminalSize;

/// Size of the controlling terminal, if there is one
pub fn current_size() -> Option<TerminalSize> {
    let (cols, rows) = crossterm::terminal::size().ok()?;
    if cols == 0 || rows == 0 {
        return None;
    }
    Some(TerminalSize::new(rows, cols))
}

/// Keeps the local terminal in raw mode while alive
pub struct RawModeGuard(());

impl RawModeGuard {
    /// Switch stdin to raw mode so keystrokes reach the remote PTY untouched.
    ///
    /// Returns `None` when stdin is not a terminal.
    pub fn enable() -> io::Result<Option<Self>> {
        if !io::stdin().is_terminal() {
            return Ok(None);
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Some(Self(())))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Stream of local terminal size changes
pub struct ResizeEvents {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl ResizeEvents {
    /// Listen for window size changes; a disabled stream never yields
    pub fn new(enabled: bool) -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let signal = if enabled {
                match signal(SignalKind::window_change()) {
                    Ok(signal) => Some(signal),
                    Err(e) => {
                        tracing::warn!("Cannot watch terminal size: {}", e);
                        None
                    }
                }
            } else {
                None
            };
            Self { signal }
        }

        #[cfg(not(unix))]
        {
            let _ = enabled;
            Self {}
        }
    }

    /// Wait for the next size change
    pub async fn next(&mut self) -> TerminalSize {
        loop {
            self.changed().await;
            if let Some(size) = current_size() {
                return size;
            }
        }
    }

    #[cfg(unix)]
    async fn changed(&mut self) {
        match self.signal.as_mut() {
            Some(signal) => {
                if signal.recv().await.is_none() {
                    self.signal = None;
                }
            }
            None => std::future::pending().await,
        }
    }

    #[cfg(not(unix))]
    async fn changed(&mut self) {
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_resize_events_never_fire() {
        let mut events = ResizeEvents::new(false);
        let next = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(next.is_err());
    }
}

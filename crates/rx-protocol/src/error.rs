//! Protocol error types

use thiserror::Error;

/// Errors that can occur while reading or writing the command channel
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A directive tag that this protocol does not define
    #[error("Unknown control directive: 0x{0:02x}")]
    UnknownDirective(u8),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error only means the peer closed the stream
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

//! Control directives
//!
//! A directive is a tagged message read from the input side of the command
//! channel while the remote process runs. Two directives exist:
//!
//! - `KILL` (`0x01`): forcibly terminate the process. No payload.
//! - `SET_TERMINAL_SIZE` (`0x02`): four big-endian `i32` values follow:
//!   columns, rows, and two reserved pixel dimensions. The reserved values
//!   are always read so the stream stays aligned, and are then discarded.

use serde::{Deserialize, Serialize};

/// Length of a full `SET_TERMINAL_SIZE` directive, tag included
pub const SET_TERMINAL_SIZE_LEN: usize = 1 + 4 * 4;

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }

    /// Convert the signed wire values of a resize directive.
    ///
    /// Returns `None` when either dimension is zero, negative, or wider
    /// than a terminal can be.
    pub fn from_wire(cols: i32, rows: i32) -> Option<Self> {
        let cols = u16::try_from(cols).ok().filter(|c| *c > 0)?;
        let rows = u16::try_from(rows).ok().filter(|r| *r > 0)?;
        Some(Self { rows, cols })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// Directive tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DirectiveTag {
    /// Terminate the running process
    Kill = 0x01,
    /// Resize the pseudo-terminal
    SetTerminalSize = 0x02,
}

impl DirectiveTag {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Kill),
            0x02 => Some(Self::SetTerminalSize),
            _ => None,
        }
    }
}

/// A decoded control directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Forcibly terminate the process
    Kill,
    /// Resize the pseudo-terminal to the given columns and rows.
    ///
    /// Values are kept as they appeared on the wire; use
    /// [`TerminalSize::from_wire`] to validate them.
    SetTerminalSize {
        /// Columns
        cols: i32,
        /// Rows
        rows: i32,
    },
}

impl Directive {
    /// Build a resize directive from a terminal size
    pub fn resize(size: TerminalSize) -> Self {
        Directive::SetTerminalSize {
            cols: i32::from(size.cols),
            rows: i32::from(size.rows),
        }
    }

    /// Tag byte for this directive
    pub fn tag(&self) -> DirectiveTag {
        match self {
            Directive::Kill => DirectiveTag::Kill,
            Directive::SetTerminalSize { .. } => DirectiveTag::SetTerminalSize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_values() {
        assert_eq!(DirectiveTag::Kill.as_u8(), 0x01);
        assert_eq!(DirectiveTag::SetTerminalSize.as_u8(), 0x02);
        assert_eq!(DirectiveTag::from_u8(0x00), None);
        assert_eq!(DirectiveTag::from_u8(0x03), None);
    }

    #[test]
    fn test_terminal_size_from_wire() {
        assert_eq!(
            TerminalSize::from_wire(80, 24),
            Some(TerminalSize::new(24, 80))
        );
        assert_eq!(TerminalSize::from_wire(0, 24), None);
        assert_eq!(TerminalSize::from_wire(80, -1), None);
        assert_eq!(TerminalSize::from_wire(70_000, 24), None);
    }

    #[test]
    fn test_resize_directive_from_size() {
        let directive = Directive::resize(TerminalSize::new(50, 132));
        assert_eq!(directive, Directive::SetTerminalSize { cols: 132, rows: 50 });
        assert_eq!(directive.tag(), DirectiveTag::SetTerminalSize);
    }

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
    }
}

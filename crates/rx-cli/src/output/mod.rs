//! Diagnostics printed by rexec itself
//!
//! Everything goes to stderr with a `rexec:` prefix so it cannot be mistaken
//! for output of the command being run. Color is only used when stderr is a
//! terminal.

use std::io::IsTerminal;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_prefixed(color: Color, label: &str, msg: &str) {
    let mut stderr = std::io::stderr();

    if stderr.is_terminal() {
        let _ = crossterm::execute!(
            stderr,
            SetForegroundColor(color),
            Print(format!("rexec: {}: ", label)),
            ResetColor,
            Print(msg),
            Print("\r\n")
        );
    } else {
        let _ = crossterm::execute!(stderr, Print(format!("rexec: {}: {}\n", label, msg)));
    }
}

/// Print an error message in red
pub fn print_error(msg: &str) {
    print_prefixed(Color::Red, "error", msg);
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    print_prefixed(Color::Yellow, "warning", msg);
}

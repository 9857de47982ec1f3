//! Colored status messages
//!
//! Every helper writes to stderr. Stdout is reserved for command output and
//! the remote terminal, so status lines never end up in a pipe.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_status(color: Color, symbol: &str, msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(symbol),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_status(Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    print_status(Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    print_status(Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_status(Color::Cyan, "ℹ ", msg);
}

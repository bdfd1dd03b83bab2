//! Terminal output helpers for the CLI
//!
//! Colored status lines for the interactive `config` commands. Tunnel and
//! agent progress goes through `tracing` instead.

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_status(mut out: impl Write, color: Color, marker: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(marker),
        Print(" "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Green check on stdout
pub fn print_success(msg: &str) {
    print_status(std::io::stdout(), Color::Green, "✓", msg);
}

/// Cyan info marker on stdout
pub fn print_info(msg: &str) {
    print_status(std::io::stdout(), Color::Cyan, "ℹ", msg);
}

/// Yellow warning on stderr
pub fn print_warning(msg: &str) {
    print_status(std::io::stderr(), Color::Yellow, "⚠", msg);
}

/// Red cross on stderr
pub fn print_error(msg: &str) {
    print_status(std::io::stderr(), Color::Red, "✗", msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_contains_message() {
        let mut buf = Vec::new();
        print_status(&mut buf, Color::Green, "✓", "Created config");

        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("✓ "));
        assert!(text.ends_with("Created config\n"));
    }
}

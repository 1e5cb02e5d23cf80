//! Display formatting for the command line recorded in the start event.
//!
//! The output is for humans reading an artifact. It is never handed to a
//! shell: the child is spawned directly from argv.

/// Join argv into a POSIX-shell-style string, single-quoting arguments that
/// contain anything outside a conservative safe set.
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_safe_char) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '_' | '-' | '.' | '/' | ':' | ',' | '=' | '+' | '@' | '%'
        )
}

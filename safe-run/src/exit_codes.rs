//! Stable exit codes for `safe-run` commands.
//!
//! External tooling greps on these values; never renumber them. Any code not
//! listed here was forwarded from the supervised child.

/// Clean run, archive success (including nothing to archive), or `check` hit.
pub const OK: i32 = 0;
/// Internal tool error not covered by a more specific code.
pub const FAILURE: i32 = 1;
/// Invalid arguments or configuration; also `check` target not found.
pub const USAGE: i32 = 2;
/// `check` target exists but is not executable.
pub const NOT_EXECUTABLE: i32 = 3;
/// `archive` destination existed in strict no-clobber mode.
pub const NO_CLOBBER_COLLISION: i32 = 40;
/// Archive move/compression or failure-artifact write hit an I/O error.
pub const IO_FAILED: i32 = 50;
/// The command was found but could not be executed.
pub const LAUNCH_FAILED: i32 = 126;
/// The command was not found.
pub const COMMAND_NOT_FOUND: i32 = 127;
/// Supervisor aborted by SIGINT.
pub const ABORTED_SIGINT: i32 = 130;
/// Supervisor aborted by SIGTERM.
pub const ABORTED_SIGTERM: i32 = 143;

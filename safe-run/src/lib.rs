//! Forensic command execution.
//!
//! `safe-run` runs one child process, captures both of its output streams
//! into an ordered event ledger, and leaves a failure artifact behind only
//! when the run did not succeed. A companion archiver moves those artifacts
//! aside without ever overwriting anything.
//!
//! - **[`core`]**: pure, deterministic logic (ledger, naming, rendering).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: side-effecting operations (environment, child processes,
//!   signals, filesystem).
//!
//! Orchestration modules ([`run`], [`archive`], [`check`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod archive;
pub mod check;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

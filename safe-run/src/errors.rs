//! Errors that carry a reserved exit code.
//!
//! Everything else travels as a plain `anyhow::Error` and exits with
//! [`exit_codes::FAILURE`].

use std::fmt;
use std::io;

use crate::exit_codes;

/// Invalid arguments or configuration, detected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError {
    pub message: String,
}

impl UsageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UsageError {}

/// Why the child process could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    NotFound,
    PermissionDenied,
    Other,
}

/// The child process never started, so no ledger or artifact exists.
#[derive(Debug)]
pub struct LaunchError {
    pub program: String,
    pub kind: LaunchFailure,
    pub source: io::Error,
}

impl LaunchError {
    pub fn from_spawn(program: &str, source: io::Error) -> Self {
        let kind = match source.kind() {
            io::ErrorKind::NotFound => LaunchFailure::NotFound,
            io::ErrorKind::PermissionDenied => LaunchFailure::PermissionDenied,
            _ => LaunchFailure::Other,
        };
        Self {
            program: program.to_string(),
            kind,
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            LaunchFailure::NotFound => exit_codes::COMMAND_NOT_FOUND,
            LaunchFailure::PermissionDenied | LaunchFailure::Other => exit_codes::LAUNCH_FAILED,
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LaunchFailure::NotFound => write!(f, "command not found: {}", self.program),
            LaunchFailure::PermissionDenied => {
                write!(f, "command not executable: {}", self.program)
            }
            LaunchFailure::Other => {
                write!(f, "failed to start {}: {}", self.program, self.source)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Filesystem failure while persisting forensic data (artifact or archive).
#[derive(Debug)]
pub struct IoFailure {
    pub operation: String,
    pub source: anyhow::Error,
}

impl IoFailure {
    pub fn new(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            operation: operation.into(),
            source,
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.operation, self.source)
    }
}

impl std::error::Error for IoFailure {}

/// Map an error onto its reserved exit code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        return exit_codes::USAGE;
    }
    if let Some(launch) = err.downcast_ref::<LaunchError>() {
        return launch.exit_code();
    }
    if err.downcast_ref::<IoFailure>().is_some() {
        return exit_codes::IO_FAILED;
    }
    exit_codes::FAILURE
}

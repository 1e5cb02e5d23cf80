//! Shared deterministic types for the supervisor and archiver.
//!
//! These types carry no I/O and must stay stable: their labels appear in
//! failure artifacts and in file names that external tooling greps for.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Source of an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Supervisor-generated metadata (start, abort, exit).
    Meta,
    Stdout,
    Stderr,
}

impl Channel {
    pub fn label(self) -> &'static str {
        match self {
            Channel::Meta => "META",
            Channel::Stdout => "STDOUT",
            Channel::Stderr => "STDERR",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a failure artifact lays out the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Stdout section, stderr section, then the event appendix.
    #[default]
    Split,
    /// One block of every event in observed order.
    Merged,
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "split" => Ok(ViewMode::Split),
            "merged" => Ok(ViewMode::Merged),
            other => Err(format!("expected `split` or `merged`, got `{other}`")),
        }
    }
}

/// Status encoded in a failure artifact's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Fail,
    Aborted,
}

impl ArtifactStatus {
    pub fn label(self) -> &'static str {
        match self {
            ArtifactStatus::Fail => "FAIL",
            ArtifactStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Termination request delivered to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    Interrupt,
    Terminate,
}

impl TermSignal {
    pub fn number(self) -> i32 {
        match self {
            TermSignal::Interrupt => 2,
            TermSignal::Terminate => 15,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TermSignal::Interrupt => "SIGINT",
            TermSignal::Terminate => "SIGTERM",
        }
    }

    /// Conventional `128 + signo` status reported when the supervisor aborts.
    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }

    pub fn from_number(signo: i32) -> Option<Self> {
        match signo {
            2 => Some(TermSignal::Interrupt),
            15 => Some(TermSignal::Terminate),
            _ => None,
        }
    }
}

/// How the child process itself ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    Signal(i32),
}

impl ChildExit {
    pub fn success(self) -> bool {
        self == ChildExit::Code(0)
    }

    /// Exit code the supervisor forwards for this child status.
    pub fn forwarded_code(self) -> i32 {
        match self {
            ChildExit::Code(code) => code,
            ChildExit::Signal(signo) => 128 + signo,
        }
    }
}

/// Final state of one supervised invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child ran to completion without the supervisor being interrupted.
    Exited(ChildExit),
    /// The supervisor received `signal` and stopped the child.
    ///
    /// `child` is `None` only when the child could not be reaped before the
    /// supervisor finalized.
    Aborted {
        signal: TermSignal,
        child: Option<ChildExit>,
    },
}

impl Termination {
    /// Artifact status for this outcome, or `None` for a clean exit.
    pub fn artifact_status(self) -> Option<ArtifactStatus> {
        match self {
            Termination::Exited(exit) if exit.success() => None,
            Termination::Exited(_) => Some(ArtifactStatus::Fail),
            Termination::Aborted { .. } => Some(ArtifactStatus::Aborted),
        }
    }

    /// Exit code the supervisor itself reports.
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Exited(exit) => exit.forwarded_code(),
            Termination::Aborted { signal, .. } => signal.exit_code(),
        }
    }
}

/// One request to execute a command under supervision.
///
/// Built once at startup from argv and the parsed configuration and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program followed by its arguments; never empty.
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub view: ViewMode,
    /// Tail lines echoed on failure; 0 disables the snippet.
    pub snippet_lines: usize,
}

//! Supervisor: one supervised invocation from spawn to exit status.
//!
//! A clean exit leaves nothing behind. Any other outcome writes exactly one
//! failure artifact, optionally echoes the output tail, and reports the path
//! on stderr.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::render::write_snippet;
use crate::core::types::{Invocation, TermSignal, Termination};
use crate::errors::{IoFailure, UsageError};
use crate::io::artifact::write_artifact;
use crate::io::process::{CollectOptions, Collected, Collector};
use crate::io::signals::SignalWatcher;

/// What a supervised invocation ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Status the supervisor exits with.
    pub exit_code: i32,
    pub termination: Termination,
    /// Failure artifact, if one was written.
    pub artifact: Option<PathBuf>,
    /// SIGINT/SIGTERM that arrived after the child was finalized, while the
    /// artifact was being written. The caller should honour it once done.
    pub pending_signal: Option<TermSignal>,
}

/// Run `invocation` under supervision.
///
/// SIGINT/SIGTERM delivered to this process while the child runs are
/// forwarded to it and turn the run into an aborted one.
#[instrument(skip_all, fields(program = ?invocation.argv.first()))]
pub fn run_supervised(invocation: &Invocation, options: CollectOptions) -> Result<RunReport> {
    preflight_log_dir(&invocation.log_dir)?;

    let collector = Collector::new(options);
    let watcher = SignalWatcher::install(collector.abort_handle())?;
    let Collected {
        captured,
        termination,
        child_pid,
    } = collector.spawn(invocation)?.wait()?;

    let exit_code = termination.exit_code();
    info!(child_pid, exit_code, ?termination, "child finished");
    let Some(status) = termination.artifact_status() else {
        return Ok(RunReport {
            exit_code,
            termination,
            artifact: None,
            pending_signal: watcher.finish(),
        });
    };

    let ledger = &captured.ledger;
    let path = write_artifact(&invocation.log_dir, ledger, &captured, status, invocation.view)
        .map_err(|err| IoFailure::new("write failure artifact", err))?;

    if invocation.snippet_lines > 0
        && let Err(err) = write_snippet(ledger, invocation.snippet_lines, &mut io::stderr().lock())
    {
        warn!(err = %err, "failed to print failure tail");
    }
    eprintln!("{}", outcome_line(termination, &path));

    Ok(RunReport {
        exit_code,
        termination,
        artifact: Some(path),
        pending_signal: watcher.finish(),
    })
}

/// Operator-facing summary printed after an artifact is written.
pub fn outcome_line(termination: Termination, artifact: &Path) -> String {
    match termination {
        Termination::Aborted { signal, .. } => format!(
            "safe-run: command aborted by {}. log: {}",
            signal.name(),
            artifact.display()
        ),
        Termination::Exited(_) => format!(
            "safe-run: command failed (rc={}). log: {}",
            termination.exit_code(),
            artifact.display()
        ),
    }
}

/// Reject a log directory path that can never hold artifacts, before the
/// command runs.
fn preflight_log_dir(log_dir: &Path) -> Result<()> {
    if log_dir.exists() && !log_dir.is_dir() {
        return Err(UsageError::new(format!(
            "log directory {} exists and is not a directory",
            log_dir.display()
        ))
        .into());
    }
    Ok(())
}

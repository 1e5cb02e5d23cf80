//! `safe-run`: forensic command executor and failure-log archiver.
//!
//! `run` supervises one command and writes a failure artifact only when it
//! does not exit cleanly. `archive` moves those artifacts aside without
//! overwriting anything. `check` reports whether a command can be launched.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use safe_run::archive::{Selection, archive};
use safe_run::check::{CheckOutcome, check_command};
use safe_run::errors::exit_code_for;
use safe_run::io::config::{ArchiveConfig, RunConfig};
use safe_run::io::process::CollectOptions;
use safe_run::io::signals;
use safe_run::logging;
use safe_run::run::run_supervised;

#[derive(Parser)]
#[command(
    name = "safe-run",
    version,
    about = "Run commands with forensic failure logs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command; on failure or interruption write one log to `SAFE_LOG_DIR`.
    Run {
        /// Program followed by its arguments.
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },
    /// Move failure logs into `SAFE_ARCHIVE_DIR` without overwriting.
    Archive {
        /// Archive every failure log instead of only the newest.
        #[arg(long, conflicts_with = "files")]
        all: bool,
        /// Refuse (exit 40) instead of auto-suffixing when a destination exists.
        #[arg(long)]
        no_clobber: bool,
        /// Specific files to archive.
        files: Vec<PathBuf>,
    },
    /// Report whether a command exists and is executable.
    Check {
        /// Program name (searched on `PATH`) or path.
        command: String,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("safe-run: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let working_dir = std::env::current_dir().context("resolve working directory")?;
    match cli.command {
        Command::Run { command } => {
            let invocation = RunConfig::from_env()?.invocation(command, &working_dir)?;
            let report = run_supervised(&invocation, CollectOptions::default())?;
            if let Some(signal) = report.pending_signal {
                eprintln!(
                    "safe-run: {} received while finishing up, exiting",
                    signal.name()
                );
                signals::terminate_self(signal)?;
            }
            Ok(report.exit_code)
        }
        Command::Archive {
            all,
            no_clobber,
            files,
        } => {
            let mut config = ArchiveConfig::from_env()?.resolved(&working_dir);
            config.strict_no_clobber |= no_clobber;
            let selection = if !files.is_empty() {
                Selection::Files(files)
            } else if all {
                Selection::All
            } else {
                Selection::Latest
            };
            let summary = archive(&config, &selection, |event| eprintln!("{event}"))?;
            Ok(summary.exit_code())
        }
        Command::Check { command } => {
            let outcome = check_command(&command, &working_dir);
            match &outcome {
                CheckOutcome::Found(path) => println!("{}", path.display()),
                CheckOutcome::NotFound => eprintln!("safe-run: Command not found: {command}"),
                CheckOutcome::NotExecutable(path) => {
                    eprintln!("safe-run: {} is not executable", path.display());
                }
            }
            Ok(outcome.exit_code())
        }
    }
}

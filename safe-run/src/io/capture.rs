//! Capture files: each stream's lines spilled to disk as they are read.
//!
//! The ledger keeps the observed order; the text of every recorded output
//! line goes to a per-stream temporary file through a buffered writer. Both
//! live behind one lock, so a line reaches its spill file exactly when the
//! ledger accepts it and never after the ledger is sealed.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use tempfile::{Builder, NamedTempFile};
use tracing::warn;

use crate::core::ledger::Ledger;
use crate::core::render::OutputSource;
use crate::core::types::Channel;

/// Capture shared between the stream readers and the supervisor loop.
pub type SharedCapture = Arc<Mutex<Capture>>;

/// Lock a shared capture, recovering the data if a reader thread panicked
/// while holding it.
pub fn lock(shared: &SharedCapture) -> MutexGuard<'_, Capture> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Spills {
    stdout: BufWriter<NamedTempFile>,
    stderr: BufWriter<NamedTempFile>,
}

/// Ledger plus spill files of a run in progress.
#[derive(Debug)]
pub struct Capture {
    ledger: Ledger,
    spills: Option<Spills>,
    error: Option<io::Error>,
}

impl Capture {
    /// Start the ledger for `argv` and create both spill files in the
    /// system temp directory. `tail_lines` output lines stay in memory for
    /// the failure tail.
    pub fn create(argv: &[String], tail_lines: usize) -> Result<Self> {
        Ok(Self {
            ledger: Ledger::start(argv).with_tail(tail_lines),
            spills: Some(Spills {
                stdout: spill_file(Channel::Stdout)?,
                stderr: spill_file(Channel::Stderr)?,
            }),
            error: None,
        })
    }

    pub fn into_shared(self) -> SharedCapture {
        Arc::new(Mutex::new(self))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Record one decoded output line. `None` once sealed.
    ///
    /// A failed spill write is remembered and reported by
    /// [`Capture::finish`]; recording carries on so the pipes keep draining.
    pub fn record_line(&mut self, channel: Channel, line: &str) -> Option<u64> {
        let seq = self.ledger.append_output(channel, line)?;
        if self.error.is_none()
            && let Some(spills) = &mut self.spills
        {
            let file = match channel {
                Channel::Stderr => &mut spills.stderr,
                Channel::Stdout | Channel::Meta => &mut spills.stdout,
            };
            if let Err(err) = writeln!(file, "{line}") {
                warn!(%channel, err = %err, "failed to spill output line");
                self.error = Some(err);
            }
        }
        Some(seq)
    }

    pub fn record_meta(&mut self, payload: String) -> Option<u64> {
        self.ledger.append_meta(payload)
    }

    /// Seal the ledger with `exit_payload` and hand over everything captured.
    ///
    /// A sealed, empty capture stays behind for readers still attached.
    pub fn finish(&mut self, exit_payload: String) -> Result<Captured> {
        self.ledger.seal(exit_payload);
        let ledger = self.ledger.take();
        let spills = self
            .spills
            .take()
            .ok_or_else(|| anyhow!("capture already finished"))?;
        if let Some(err) = self.error.take() {
            return Err(err).context("spill child output");
        }
        Ok(Captured {
            ledger,
            stdout: finish_spill(spills.stdout)?,
            stderr: finish_spill(spills.stderr)?,
        })
    }
}

fn spill_file(channel: Channel) -> Result<BufWriter<NamedTempFile>> {
    let prefix = format!("safe-run-{}-", channel.label().to_ascii_lowercase());
    let file = Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile()
        .with_context(|| format!("create {channel} capture file"))?;
    Ok(BufWriter::new(file))
}

fn finish_spill(writer: BufWriter<NamedTempFile>) -> Result<NamedTempFile> {
    writer
        .into_inner()
        .map_err(|err| err.into_error())
        .context("flush capture file")
}

/// Everything one finished run produced. The spill files are removed when
/// this is dropped.
#[derive(Debug)]
pub struct Captured {
    /// Sealed; the exit event is last.
    pub ledger: Ledger,
    stdout: NamedTempFile,
    stderr: NamedTempFile,
}

impl OutputSource for Captured {
    type Reader = BufReader<File>;

    fn open(&self, channel: Channel) -> io::Result<BufReader<File>> {
        let spill = match channel {
            Channel::Stderr => &self.stderr,
            Channel::Stdout | Channel::Meta => &self.stdout,
        };
        Ok(BufReader::new(spill.reopen()?))
    }
}

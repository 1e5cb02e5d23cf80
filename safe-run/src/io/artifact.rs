//! Writing failure artifacts to the log directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::ledger::Ledger;
use crate::core::naming::artifact_file_name;
use crate::core::render::{OutputSource, render};
use crate::core::types::{ArtifactStatus, ViewMode};

/// Upper bound on name attempts before giving up on a directory.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

static NEXT_DISAMBIGUATOR: AtomicU32 = AtomicU32::new(0);

/// Render `ledger`, with output text read from `output`, into a new file
/// under `log_dir` and return its path.
///
/// The directory is created if absent. The file is created with create-new
/// semantics, so an existing artifact is never overwritten; on a name clash
/// the next disambiguator is tried. Contents are synced before returning.
#[instrument(skip(ledger, output), fields(events = ledger.len()))]
pub fn write_artifact<S: OutputSource>(
    log_dir: &Path,
    ledger: &Ledger,
    output: &S,
    status: ArtifactStatus,
    view: ViewMode,
) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let created_at = Utc::now();
    let pid = std::process::id();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let disambiguator = NEXT_DISAMBIGUATOR.fetch_add(1, Ordering::Relaxed);
        let path = log_dir.join(artifact_file_name(created_at, pid, status, disambiguator));
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "artifact name taken, trying next");
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create {}", path.display()));
            }
        };
        write_rendered(file, ledger, output, view).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "artifact written");
        return Ok(path);
    }
    bail!(
        "no free artifact name in {} after {MAX_NAME_ATTEMPTS} attempts",
        log_dir.display()
    )
}

fn write_rendered<S: OutputSource>(
    file: File,
    ledger: &Ledger,
    output: &S,
    view: ViewMode,
) -> io::Result<()> {
    let mut out = BufWriter::new(file);
    render(ledger, output, view, &mut out)?;
    out.flush()?;
    out.get_ref().sync_all()
}

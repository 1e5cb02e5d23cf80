//! Archiver: relocates failure artifacts without ever overwriting data.
//!
//! Per file: `Selected -> Validated -> Moved -> [Compressed] -> Done`, or
//! `Selected -> Collision -> (Suffixed | Rejected)`. Files are processed one
//! at a time in name order. A strict-mode collision rejects only that file;
//! an I/O failure stops the whole call.

use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::naming::{has_artifact_suffix, parse_artifact_name, suffixed_name};
use crate::errors::{IoFailure, UsageError};
use crate::exit_codes;
use crate::io::compress::{compress_file, compressed_path};
use crate::io::config::{ArchiveConfig, Compression};

/// Which artifacts an archive call processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The newest artifact in the fail directory.
    Latest,
    /// Every artifact in the fail directory.
    All,
    /// Exactly these files.
    Files(Vec<PathBuf>),
}

/// Progress reported while archiving, in the order it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    NothingToArchive { dir: PathBuf },
    Suffixed { dest: PathBuf },
    Rejected { dest: PathBuf },
    Archived { source: PathBuf, dest: PathBuf },
    Compressed { path: PathBuf },
}

impl fmt::Display for ArchiveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveEvent::NothingToArchive { dir } => {
                write!(f, "No files to archive in {}", dir.display())
            }
            ArchiveEvent::Suffixed { dest } => write!(
                f,
                "WARNING: destination exists, using auto-suffix: {}",
                dest.display()
            ),
            ArchiveEvent::Rejected { dest } => write!(
                f,
                "ERROR: destination exists (no-clobber): {}",
                dest.display()
            ),
            ArchiveEvent::Archived { source, dest } => {
                write!(f, "ARCHIVED: {} -> {}", source.display(), dest.display())
            }
            ArchiveEvent::Compressed { path } => write!(f, "COMPRESSED: {}", path.display()),
        }
    }
}

/// Result of an archive call that did not hit an I/O failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Final location of each archived file (compressed name if compressed).
    pub archived: Vec<PathBuf>,
    /// Sources left in place because their destination existed (strict mode).
    pub rejected: Vec<PathBuf>,
}

impl ArchiveSummary {
    pub fn exit_code(&self) -> i32 {
        if self.rejected.is_empty() {
            exit_codes::OK
        } else {
            exit_codes::NO_CLOBBER_COLLISION
        }
    }
}

/// Archive the selected artifacts from `config.fail_dir` into
/// `config.archive_dir`.
///
/// Invalid explicit files fail with a [`UsageError`] before anything moves.
/// Filesystem failures surface as [`IoFailure`].
#[instrument(skip(on_event), fields(fail_dir = %config.fail_dir.display()))]
pub fn archive<F: FnMut(&ArchiveEvent)>(
    config: &ArchiveConfig,
    selection: &Selection,
    mut on_event: F,
) -> Result<ArchiveSummary> {
    let sources = select(config, selection)?;
    let mut summary = ArchiveSummary::default();
    if sources.is_empty() {
        on_event(&ArchiveEvent::NothingToArchive {
            dir: config.fail_dir.clone(),
        });
        return Ok(summary);
    }

    fs::create_dir_all(&config.archive_dir)
        .with_context(|| format!("create {}", config.archive_dir.display()))
        .map_err(|err| IoFailure::new("prepare archive directory", err))?;

    for source in sources {
        match archive_one(config, &source, &mut on_event)? {
            Some(path) => summary.archived.push(path),
            None => summary.rejected.push(source),
        }
    }
    debug!(
        archived = summary.archived.len(),
        rejected = summary.rejected.len(),
        "archive finished"
    );
    Ok(summary)
}

/// Resolve `selection` into the ordered list of files to process.
fn select(config: &ArchiveConfig, selection: &Selection) -> Result<Vec<PathBuf>> {
    match selection {
        Selection::Files(files) => {
            for file in files {
                validate_source(file)?;
            }
            Ok(files.clone())
        }
        Selection::All => list_artifacts(&config.fail_dir),
        Selection::Latest => {
            let newest = list_artifacts(&config.fail_dir)?
                .into_iter()
                .max_by(|a, b| by_recency(a, b));
            Ok(newest.into_iter().collect())
        }
    }
}

/// Order artifacts by the creation time and disambiguator in their names,
/// falling back to the name itself. Names that do not parse count as oldest.
fn by_recency(a: &Path, b: &Path) -> Ordering {
    let key = |path: &Path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_artifact_name)
            .map(|name| (name.created_at, name.disambiguator))
    };
    key(a)
        .cmp(&key(b))
        .then_with(|| a.file_name().cmp(&b.file_name()))
}

fn validate_source(file: &Path) -> Result<()> {
    match fs::metadata(file) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(UsageError::new(format!("not a regular file: {}", file.display())).into()),
        Err(_) => Err(UsageError::new(format!("no such file: {}", file.display())).into()),
    }
}

/// Artifact files in `dir`, sorted by name. A missing directory is empty.
pub fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))
        .map_err(|err| IoFailure::new("list failure artifacts", err))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("read {}", dir.display()))
            .map_err(|err| IoFailure::new("list failure artifacts", err))?;
        let is_file = entry.file_type().is_ok_and(|kind| kind.is_file());
        let matches = entry.file_name().to_str().is_some_and(has_artifact_suffix);
        if is_file && matches {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Move one file; `None` means it was rejected by strict no-clobber.
fn archive_one<F: FnMut(&ArchiveEvent)>(
    config: &ArchiveConfig,
    source: &Path,
    on_event: &mut F,
) -> Result<Option<PathBuf>> {
    let name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("unsupported file name: {}", source.display()))?;

    let mut attempt = 0u32;
    let dest = loop {
        let candidate = if attempt == 0 {
            config.archive_dir.join(name)
        } else {
            config.archive_dir.join(suffixed_name(name, attempt))
        };
        let collided = if destination_taken(&candidate, config.compression) {
            true
        } else {
            match move_file(source, &candidate) {
                Ok(()) => false,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => true,
                Err(err) => {
                    let err = anyhow::Error::new(err).context(format!(
                        "move {} to {}",
                        source.display(),
                        candidate.display()
                    ));
                    return Err(IoFailure::new("archive", err).into());
                }
            }
        };
        if !collided {
            break candidate;
        }
        if config.strict_no_clobber {
            on_event(&ArchiveEvent::Rejected { dest: candidate });
            return Ok(None);
        }
        attempt = attempt
            .checked_add(1)
            .ok_or_else(|| anyhow!("no free archive name for {name}"))?;
    };

    if attempt > 0 {
        on_event(&ArchiveEvent::Suffixed { dest: dest.clone() });
    }
    on_event(&ArchiveEvent::Archived {
        source: source.to_path_buf(),
        dest: dest.clone(),
    });

    let compressed = compress_file(&dest, config.compression)
        .map_err(|err| IoFailure::new(format!("compress {}", dest.display()), err))?;
    match compressed {
        Some(path) => {
            on_event(&ArchiveEvent::Compressed { path: path.clone() });
            Ok(Some(path))
        }
        None => Ok(Some(dest)),
    }
}

/// True when `dest` or its compressed name already exists.
fn destination_taken(dest: &Path, compression: Compression) -> bool {
    let exists = |path: &Path| fs::symlink_metadata(path).is_ok();
    exists(dest) || compressed_path(dest, compression).is_some_and(|path| exists(&path))
}

/// Move without overwriting: the source is removed only once `dest` holds
/// the data.
fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::hard_link(source, dest) {
        Ok(()) => fs::remove_file(source),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(err),
        Err(err) => {
            debug!(err = %err, "hard link failed, copying instead");
            copy_then_remove(source, dest)
        }
    }
}

fn copy_then_remove(source: &Path, dest: &Path) -> io::Result<()> {
    let mut output = OpenOptions::new().write(true).create_new(true).open(dest)?;
    if let Err(err) = copy_into(source, &mut output) {
        drop(output);
        let _ = fs::remove_file(dest);
        return Err(err);
    }
    fs::remove_file(source)
}

fn copy_into(source: &Path, output: &mut File) -> io::Result<()> {
    let mut input = File::open(source)?;
    io::copy(&mut input, output)?;
    output.sync_all()
}

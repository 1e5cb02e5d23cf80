//! Post-move compression of archived artifacts.
//!
//! gzip runs in-process through `flate2`. xz and zstd shell out to the
//! external tool, which must be on `PATH`; when it is missing the file is
//! left uncompressed and an error is returned.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use tracing::{debug, instrument};

use crate::io::config::Compression;

/// Path `path` will have after compression, or `None` for [`Compression::None`].
pub fn compressed_path(path: &Path, compression: Compression) -> Option<PathBuf> {
    let extension = compression.extension()?;
    let mut raw = OsString::from(path.as_os_str());
    raw.push(".");
    raw.push(extension);
    Some(PathBuf::from(raw))
}

/// Compress `path` in place, replacing it with the compressed file.
///
/// Returns the compressed path, or `None` when `compression` is
/// [`Compression::None`].
#[instrument(skip_all, fields(path = %path.display(), method = %compression))]
pub fn compress_file(path: &Path, compression: Compression) -> Result<Option<PathBuf>> {
    let Some(target) = compressed_path(path, compression) else {
        return Ok(None);
    };
    match compression {
        Compression::None => return Ok(None),
        Compression::Gzip => gzip(path, &target)?,
        Compression::Xz => run_tool("xz", &["-T0", "-f"], path)?,
        Compression::Zstd => run_tool("zstd", &["-q", "-T0", "-f", "--rm"], path)?,
    }
    if !target.is_file() {
        bail!("{compression} did not produce {}", target.display());
    }
    debug!(target = %target.display(), "compressed");
    Ok(Some(target))
}

fn gzip(path: &Path, target: &Path) -> Result<()> {
    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .with_context(|| format!("create {}", target.display()))?;
    if let Err(err) = write_gzip(path, output) {
        // Only the partial output is ours to remove; the source stays.
        let _ = fs::remove_file(target);
        return Err(err).with_context(|| format!("gzip {}", path.display()));
    }
    fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
}

fn write_gzip(path: &Path, output: File) -> io::Result<()> {
    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(BufWriter::new(output), GzLevel::default());
    io::copy(&mut input, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn run_tool(tool: &str, args: &[&str], path: &Path) -> Result<()> {
    let program = which::which(tool).map_err(|_| {
        anyhow!(
            "{tool} not found on PATH; archived file left uncompressed at {}",
            path.display()
        )
    })?;
    debug!(program = %program.display(), "running compressor");
    let output = Command::new(&program)
        .args(args)
        .arg(path)
        .output()
        .with_context(|| format!("run {}", program.display()))?;
    if !output.status.success() {
        bail!(
            "{tool} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

//! Environment-driven configuration, parsed once at startup.
//!
//! Components never read `SAFE_*` variables themselves; they receive the
//! immutable structs built here. `from_lookup` takes any key lookup so tests
//! can supply variables without touching the process environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;

use crate::core::types::{Invocation, ViewMode};
use crate::errors::UsageError;

pub const DEFAULT_LOG_DIR: &str = ".agent/FAIL-LOGS";
pub const DEFAULT_ARCHIVE_DIR: &str = ".agent/FAIL-ARCHIVE";

pub const ENV_LOG_DIR: &str = "SAFE_LOG_DIR";
pub const ENV_SNIPPET_LINES: &str = "SAFE_SNIPPET_LINES";
pub const ENV_RUN_VIEW: &str = "SAFE_RUN_VIEW";
pub const ENV_FAIL_DIR: &str = "SAFE_FAIL_DIR";
pub const ENV_ARCHIVE_DIR: &str = "SAFE_ARCHIVE_DIR";
pub const ENV_ARCHIVE_COMPRESS: &str = "SAFE_ARCHIVE_COMPRESS";
pub const ENV_ARCHIVE_NO_CLOBBER: &str = "SAFE_ARCHIVE_NO_CLOBBER";

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Where failure artifacts are written.
    pub log_dir: PathBuf,
    pub view: ViewMode,
    /// Tail lines echoed on failure; 0 disables the snippet.
    pub snippet_lines: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            view: ViewMode::Split,
            snippet_lines: 0,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut cfg = RunConfig::default();
        if let Some(dir) = non_blank(lookup(ENV_LOG_DIR)) {
            cfg.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = non_blank(lookup(ENV_SNIPPET_LINES)) {
            cfg.snippet_lines = raw.trim().parse::<usize>().map_err(|_| {
                UsageError::new(format!(
                    "{ENV_SNIPPET_LINES} must be a non-negative integer, got `{raw}`"
                ))
            })?;
        }
        if let Some(raw) = non_blank(lookup(ENV_RUN_VIEW)) {
            cfg.view = raw
                .parse::<ViewMode>()
                .map_err(|err: String| UsageError::new(format!("{ENV_RUN_VIEW}: {err}")))?;
        }
        Ok(cfg)
    }

    /// Bind argv and working directory into an [`Invocation`].
    ///
    /// Relative log directories resolve against `working_dir`.
    pub fn invocation(&self, argv: Vec<String>, working_dir: &Path) -> Result<Invocation> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(UsageError::new("usage: safe-run run <command> [args...]").into());
        }
        Ok(Invocation {
            argv,
            working_dir: working_dir.to_path_buf(),
            log_dir: working_dir.join(&self.log_dir),
            view: self.view,
            snippet_lines: self.snippet_lines,
        })
    }
}

/// Post-move compression applied by the archiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    pub fn label(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Xz => "xz",
            Compression::Zstd => "zstd",
        }
    }

    /// Extension appended to a compressed file, without the dot.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Xz => Some("xz"),
            Compression::Zstd => Some("zst"),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "xz" => Ok(Compression::Xz),
            "zstd" => Ok(Compression::Zstd),
            other => Err(format!("expected none|gzip|xz|zstd, got `{other}`")),
        }
    }
}

/// Archiver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Directory scanned for failure artifacts.
    pub fail_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub compression: Compression,
    /// Refuse (rather than auto-suffix) when a destination exists.
    pub strict_no_clobber: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            fail_dir: PathBuf::from(DEFAULT_LOG_DIR),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            compression: Compression::None,
            strict_no_clobber: false,
        }
    }
}

impl ArchiveConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut cfg = ArchiveConfig::default();
        if let Some(dir) = non_blank(lookup(ENV_FAIL_DIR)) {
            cfg.fail_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_blank(lookup(ENV_ARCHIVE_DIR)) {
            cfg.archive_dir = PathBuf::from(dir);
        }
        if let Some(raw) = non_blank(lookup(ENV_ARCHIVE_COMPRESS)) {
            cfg.compression = raw.parse::<Compression>().map_err(|err: String| {
                UsageError::new(format!("{ENV_ARCHIVE_COMPRESS}: {err}"))
            })?;
        }
        cfg.strict_no_clobber = lookup(ENV_ARCHIVE_NO_CLOBBER).as_deref() == Some("1");
        Ok(cfg)
    }

    /// Resolve relative directories against `working_dir`.
    pub fn resolved(mut self, working_dir: &Path) -> Self {
        self.fail_dir = working_dir.join(&self.fail_dir);
        self.archive_dir = working_dir.join(&self.archive_dir);
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

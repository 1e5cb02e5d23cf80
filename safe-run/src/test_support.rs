//! Test-only helpers shared by unit and CLI tests.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::core::render::OutputSource;
use crate::core::types::{Channel, Invocation, ViewMode};
use crate::io::capture::{SharedCapture, lock};
use crate::io::config::{
    DEFAULT_ARCHIVE_DIR, DEFAULT_LOG_DIR, ENV_ARCHIVE_COMPRESS, ENV_ARCHIVE_DIR,
    ENV_ARCHIVE_NO_CLOBBER, ENV_FAIL_DIR, ENV_LOG_DIR, ENV_RUN_VIEW, ENV_SNIPPET_LINES,
};

const SAFE_ENV: [&str; 7] = [
    ENV_LOG_DIR,
    ENV_SNIPPET_LINES,
    ENV_RUN_VIEW,
    ENV_FAIL_DIR,
    ENV_ARCHIVE_DIR,
    ENV_ARCHIVE_COMPRESS,
    ENV_ARCHIVE_NO_CLOBBER,
];

/// Split-view invocation rooted at `working_dir` with default directories.
pub fn invocation(working_dir: &Path, argv: &[&str]) -> Invocation {
    Invocation {
        argv: argv.iter().map(|arg| arg.to_string()).collect(),
        working_dir: working_dir.to_path_buf(),
        log_dir: working_dir.join(DEFAULT_LOG_DIR),
        view: ViewMode::Split,
        snippet_lines: 0,
    }
}

/// Poll `capture` until `count` lines have arrived on `channel` or `timeout`
/// passes.
pub fn wait_for_lines(
    capture: &SharedCapture,
    channel: Channel,
    count: u64,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if lock(capture).ledger().line_count(channel) >= count {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Every captured line of `channel`, without terminators.
pub fn read_lines<S: OutputSource>(output: &S, channel: Channel) -> io::Result<Vec<String>> {
    output.open(channel)?.lines().collect()
}

/// In-memory [`OutputSource`] for rendering tests.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    stdout: String,
    stderr: String,
}

impl MemoryOutput {
    pub fn push(&mut self, channel: Channel, line: &str) {
        let text = match channel {
            Channel::Stderr => &mut self.stderr,
            Channel::Stdout | Channel::Meta => &mut self.stdout,
        };
        text.push_str(line);
        text.push('\n');
    }
}

impl OutputSource for MemoryOutput {
    type Reader = io::Cursor<Vec<u8>>;

    fn open(&self, channel: Channel) -> io::Result<Self::Reader> {
        let text = match channel {
            Channel::Stderr => &self.stderr,
            Channel::Stdout | Channel::Meta => &self.stdout,
        };
        Ok(io::Cursor::new(text.clone().into_bytes()))
    }
}

/// Regular files in `dir`, sorted. A missing directory yields none.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Write an executable `sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Temporary working directory for driving the `safe-run` binary.
pub struct Workspace {
    temp: TempDir,
}

impl Workspace {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.path().join(DEFAULT_LOG_DIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.path().join(DEFAULT_ARCHIVE_DIR)
    }

    /// Files currently in the default log directory.
    pub fn artifacts(&self) -> io::Result<Vec<PathBuf>> {
        list_files(&self.log_dir())
    }

    pub fn archived(&self) -> io::Result<Vec<PathBuf>> {
        list_files(&self.archive_dir())
    }

    /// Place a file in the log directory as if a failed run had written it.
    pub fn seed_artifact(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        seed(&self.log_dir(), name, contents)
    }

    pub fn seed_archived(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        seed(&self.archive_dir(), name, contents)
    }

    /// `bin` run inside the workspace with every `SAFE_*` variable cleared.
    pub fn command(&self, bin: impl AsRef<OsStr>) -> Command {
        let mut cmd = Command::new(bin);
        cmd.current_dir(self.path());
        for key in SAFE_ENV {
            cmd.env_remove(key);
        }
        cmd
    }
}

fn seed(dir: &Path, name: &str, contents: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

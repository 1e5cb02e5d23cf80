//! `safe-run check`: is a command available to run?

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::exit_codes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Resolved to an executable file.
    Found(PathBuf),
    NotFound,
    /// A file exists at the path but lacks execute permission.
    NotExecutable(PathBuf),
}

impl CheckOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CheckOutcome::Found(_) => exit_codes::OK,
            CheckOutcome::NotFound => exit_codes::USAGE,
            CheckOutcome::NotExecutable(_) => exit_codes::NOT_EXECUTABLE,
        }
    }
}

/// Resolve `command` the way a shell would.
///
/// Names containing a path separator are taken relative to `working_dir`;
/// bare names are searched on `PATH`.
pub fn check_command(command: &str, working_dir: &Path) -> CheckOutcome {
    if command.is_empty() {
        return CheckOutcome::NotFound;
    }
    if Path::new(command).components().count() > 1 {
        let path = working_dir.join(command);
        debug!(path = %path.display(), "checking explicit path");
        return if !path.is_file() {
            CheckOutcome::NotFound
        } else if is_executable(&path) {
            CheckOutcome::Found(path)
        } else {
            CheckOutcome::NotExecutable(path)
        };
    }
    match which::which(command) {
        Ok(path) => CheckOutcome::Found(path),
        Err(err) => {
            debug!(command, err = %err, "not found on PATH");
            CheckOutcome::NotFound
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|meta| meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::write_script;

    #[test]
    fn bare_name_resolves_through_path() {
        let outcome = check_command("sh", Path::new("/"));
        let CheckOutcome::Found(path) = outcome else {
            panic!("sh should be on PATH, got {outcome:?}");
        };
        assert!(path.is_absolute());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let outcome = check_command("definitely-not-a-real-binary-xyz", Path::new("/"));
        assert_eq!(outcome, CheckOutcome::NotFound);
        assert_eq!(outcome.exit_code(), exit_codes::USAGE);
    }

    #[test]
    fn relative_path_is_checked_for_execute_bit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script(temp.path(), "tool.sh", "exit 0").expect("script");
        let plain = temp.path().join("data.txt");
        fs::write(&plain, "x").expect("write");

        assert_eq!(
            check_command("./tool.sh", temp.path()),
            CheckOutcome::Found(temp.path().join("./tool.sh"))
        );
        assert!(script.exists());

        let outcome = check_command("./data.txt", temp.path());
        assert_eq!(
            outcome,
            CheckOutcome::NotExecutable(temp.path().join("./data.txt"))
        );
        assert_eq!(outcome.exit_code(), exit_codes::NOT_EXECUTABLE);
        assert_eq!(
            check_command("./missing.sh", temp.path()),
            CheckOutcome::NotFound
        );
    }
}

//! CLI tests for `safe-run archive`.

use std::fs;
use std::io::Read;

use flate2::read::GzDecoder;

use safe_run::exit_codes;
use safe_run::test_support::Workspace;

const OLD: &str = "20240101T000000Z-pid100-FAIL.log";
const NEW: &str = "20240102T000000Z-pid200-ABORTED.log";

fn safe_archive(ws: &Workspace) -> std::process::Command {
    let mut cmd = ws.command(env!("CARGO_BIN_EXE_safe-run"));
    cmd.arg("archive");
    cmd
}

#[test]
fn default_archives_one_artifact() {
    let ws = Workspace::new().expect("workspace");
    ws.seed_artifact(OLD, "old").expect("seed");
    ws.seed_artifact(NEW, "new").expect("seed");

    let output = safe_archive(&ws).output().expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(ws.artifacts().expect("list").len(), 1);
    assert_eq!(ws.archived().expect("list").len(), 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("ARCHIVED: "), "{stderr}");
}

#[test]
fn all_archives_every_artifact_in_name_order() {
    let ws = Workspace::new().expect("workspace");
    ws.seed_artifact(NEW, "new").expect("seed");
    ws.seed_artifact(OLD, "old").expect("seed");

    let output = safe_archive(&ws)
        .arg("--all")
        .output()
        .expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(ws.artifacts().expect("list").is_empty());
    assert_eq!(
        ws.archived().expect("list"),
        vec![ws.archive_dir().join(OLD), ws.archive_dir().join(NEW)]
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    let old_at = stderr.find(OLD).expect("old line");
    let new_at = stderr.find(NEW).expect("new line");
    assert!(old_at < new_at);
}

#[test]
fn collision_auto_suffixes_by_default() {
    let ws = Workspace::new().expect("workspace");
    ws.seed_artifact(OLD, "fresh").expect("seed");
    ws.seed_archived(OLD, "original").expect("seed");

    let output = safe_archive(&ws).output().expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(ws.archive_dir().join(OLD)).expect("read"),
        "original"
    );
    let suffixed = ws.archive_dir().join("20240101T000000Z-pid100-FAIL-1.log");
    assert_eq!(fs::read_to_string(&suffixed).expect("read"), "fresh");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("WARNING: destination exists, using auto-suffix: "));
}

#[test]
fn no_clobber_flag_refuses_and_keeps_source() {
    let ws = Workspace::new().expect("workspace");
    let source = ws.seed_artifact(OLD, "fresh").expect("seed");
    ws.seed_archived(OLD, "original").expect("seed");

    let output = safe_archive(&ws)
        .arg("--no-clobber")
        .output()
        .expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::NO_CLOBBER_COLLISION));
    assert_eq!(fs::read_to_string(&source).expect("read"), "fresh");
    assert_eq!(
        fs::read_to_string(ws.archive_dir().join(OLD)).expect("read"),
        "original"
    );
    assert_eq!(ws.archived().expect("list").len(), 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: destination exists (no-clobber): "));
}

#[test]
fn no_clobber_env_matches_the_flag() {
    let ws = Workspace::new().expect("workspace");
    ws.seed_artifact(OLD, "fresh").expect("seed");
    ws.seed_archived(OLD, "original").expect("seed");

    let status = safe_archive(&ws)
        .env("SAFE_ARCHIVE_NO_CLOBBER", "1")
        .status()
        .expect("safe-run archive");

    assert_eq!(status.code(), Some(exit_codes::NO_CLOBBER_COLLISION));
}

#[test]
fn gzip_compresses_after_the_move() {
    let ws = Workspace::new().expect("workspace");
    ws.seed_artifact(OLD, "=== STDOUT ===\nhello\n").expect("seed");

    let output = safe_archive(&ws)
        .env("SAFE_ARCHIVE_COMPRESS", "gzip")
        .output()
        .expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let gz = ws.archive_dir().join(format!("{OLD}.gz"));
    assert_eq!(ws.archived().expect("list"), vec![gz.clone()]);
    let mut text = String::new();
    GzDecoder::new(fs::File::open(&gz).expect("open"))
        .read_to_string(&mut text)
        .expect("decode");
    assert_eq!(text, "=== STDOUT ===\nhello\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!("COMPRESSED: {}", gz.display())));
}

/// Archive `OLD` with an external compressor, or `None` when `tool` is not
/// installed here.
fn archive_with_tool(tool: &str, method: &str) -> Option<(Workspace, std::process::Output)> {
    if which::which(tool).is_err() {
        eprintln!("skipping: {tool} not on PATH");
        return None;
    }
    let ws = Workspace::new().expect("workspace");
    ws.seed_artifact(OLD, "=== STDOUT ===\nhello\n").expect("seed");
    let output = safe_archive(&ws)
        .env("SAFE_ARCHIVE_COMPRESS", method)
        .output()
        .expect("safe-run archive");
    Some((ws, output))
}

#[test]
fn xz_compresses_with_the_external_tool() {
    let Some((ws, output)) = archive_with_tool("xz", "xz") else {
        return;
    };

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let xz = ws.archive_dir().join(format!("{OLD}.xz"));
    assert_eq!(ws.archived().expect("list"), vec![xz.clone()]);
    let bytes = fs::read(&xz).expect("read");
    assert!(bytes.starts_with(b"\xFD7zXZ\x00"));
    assert!(ws.artifacts().expect("list").is_empty());
}

#[test]
fn zstd_compresses_with_the_external_tool() {
    let Some((ws, output)) = archive_with_tool("zstd", "zstd") else {
        return;
    };

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let zst = ws.archive_dir().join(format!("{OLD}.zst"));
    assert_eq!(ws.archived().expect("list"), vec![zst.clone()]);
    let bytes = fs::read(&zst).expect("read");
    assert!(bytes.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]));
}

#[test]
fn missing_compressor_keeps_the_moved_file_and_exits_50() {
    for method in ["xz", "zstd"] {
        let ws = Workspace::new().expect("workspace");
        let source = ws.seed_artifact(OLD, "keep me").expect("seed");

        let output = safe_archive(&ws)
            .env("SAFE_ARCHIVE_COMPRESS", method)
            .env("PATH", "")
            .output()
            .expect("safe-run archive");

        assert_eq!(output.status.code(), Some(exit_codes::IO_FAILED), "{method}");
        assert!(!source.exists(), "{method}: move is not rolled back");
        let dest = ws.archive_dir().join(OLD);
        assert_eq!(ws.archived().expect("list"), vec![dest.clone()]);
        assert_eq!(fs::read_to_string(&dest).expect("read"), "keep me");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.starts_with("ARCHIVED: "), "{stderr}");
        assert!(
            stderr.contains(&format!("{method} not found on PATH")),
            "{stderr}"
        );
    }
}

#[test]
fn invalid_compression_fails_before_moving() {
    let ws = Workspace::new().expect("workspace");
    let source = ws.seed_artifact(OLD, "keep me").expect("seed");

    let output = safe_archive(&ws)
        .env("SAFE_ARCHIVE_COMPRESS", "bzip2")
        .output()
        .expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::USAGE));
    assert_eq!(fs::read_to_string(&source).expect("read"), "keep me");
    assert!(!ws.archive_dir().exists());
}

#[test]
fn explicit_file_is_archived() {
    let ws = Workspace::new().expect("workspace");
    let source = ws.seed_artifact(NEW, "x").expect("seed");
    ws.seed_artifact(OLD, "y").expect("seed");

    let status = safe_archive(&ws)
        .arg(&source)
        .status()
        .expect("safe-run archive");

    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(ws.archived().expect("list"), vec![ws.archive_dir().join(NEW)]);
    assert_eq!(ws.artifacts().expect("list"), vec![ws.log_dir().join(OLD)]);
}

#[test]
fn missing_explicit_file_is_a_usage_error() {
    let ws = Workspace::new().expect("workspace");

    let output = safe_archive(&ws)
        .arg("nope-FAIL.log")
        .output()
        .expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::USAGE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no such file: nope-FAIL.log"));
}

#[test]
fn all_conflicts_with_explicit_files() {
    let ws = Workspace::new().expect("workspace");

    let status = safe_archive(&ws)
        .args(["--all", "x-FAIL.log"])
        .status()
        .expect("safe-run archive");

    assert_eq!(status.code(), Some(exit_codes::USAGE));
}

#[test]
fn nothing_to_archive_is_a_no_op() {
    let ws = Workspace::new().expect("workspace");

    let output = safe_archive(&ws)
        .arg("--all")
        .output()
        .expect("safe-run archive");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(!ws.archive_dir().exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No files to archive in "));
}

#[cfg(unix)]
#[test]
fn failed_run_can_be_archived_end_to_end() {
    let ws = Workspace::new().expect("workspace");
    let status = ws
        .command(env!("CARGO_BIN_EXE_safe-run"))
        .args(["run", "sh", "-c", "echo boom >&2; exit 2"])
        .status()
        .expect("safe-run run");
    assert_eq!(status.code(), Some(2));
    let artifacts = ws.artifacts().expect("list");
    assert_eq!(artifacts.len(), 1);

    let status = safe_archive(&ws).status().expect("safe-run archive");

    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(ws.artifacts().expect("list").is_empty());
    let archived = ws.archived().expect("list");
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].file_name(), artifacts[0].file_name());
}

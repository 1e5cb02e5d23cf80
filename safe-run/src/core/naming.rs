//! Failure artifact file names.
//!
//! Canonical form: `{YYYYMMDD}T{HHMMSS}Z-pid{pid}-{STATUS}.log`. When a name is
//! already taken, a disambiguator is inserted before the status,
//! `...-pid{pid}-{n}-{STATUS}.log`, so the `-FAIL.log` / `-ABORTED.log`
//! suffix that callers match on is always preserved.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use super::types::ArtifactStatus;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const FAIL_SUFFIX: &str = "-FAIL.log";
const ABORTED_SUFFIX: &str = "-ABORTED.log";

static ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8}T\d{6}Z)-pid(\d+)(?:-(\d+))?-(FAIL|ABORTED)\.log$")
        .expect("valid artifact name regex")
});

/// Components recovered from an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub created_at: DateTime<Utc>,
    pub pid: u32,
    /// 0 for the canonical name.
    pub disambiguator: u32,
    pub status: ArtifactStatus,
}

/// Build the file name for an artifact.
pub fn artifact_file_name(
    created_at: DateTime<Utc>,
    pid: u32,
    status: ArtifactStatus,
    disambiguator: u32,
) -> String {
    let timestamp = created_at.format(TIMESTAMP_FORMAT);
    if disambiguator == 0 {
        format!("{timestamp}-pid{pid}-{status}.log")
    } else {
        format!("{timestamp}-pid{pid}-{disambiguator}-{status}.log")
    }
}

/// True for any name carrying an artifact status suffix.
///
/// This is the loose check the archiver uses to select files.
pub fn has_artifact_suffix(name: &str) -> bool {
    name.ends_with(FAIL_SUFFIX) || name.ends_with(ABORTED_SUFFIX)
}

/// Parse a name produced by [`artifact_file_name`].
pub fn parse_artifact_name(name: &str) -> Option<ArtifactName> {
    let caps = ARTIFACT_RE.captures(name)?;
    let created_at = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    let pid = caps[2].parse().ok()?;
    let disambiguator = match caps.get(3) {
        Some(n) => n.as_str().parse().ok()?,
        None => 0,
    };
    let status = match &caps[4] {
        "FAIL" => ArtifactStatus::Fail,
        _ => ArtifactStatus::Aborted,
    };
    Some(ArtifactName {
        created_at,
        pid,
        disambiguator,
        status,
    })
}

/// Insert `-{n}` before the final extension: `a-FAIL.log` -> `a-FAIL-2.log`.
///
/// Names without an extension (or dotfiles) get the suffix appended.
pub fn suffixed_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{name}-{n}"),
    }
}

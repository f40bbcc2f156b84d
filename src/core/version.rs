//! Module keys, version tokens and pseudo-versions

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::core::error::{ProxyError, ProxyResult};

/// Normalized module path, e.g. `github.com/org/repo`. Identity key for the
/// version cache and the fetch locks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(String);

impl ModuleKey {
    /// Validate a decoded module path. Elements may not be empty, `.` or `..`,
    /// so a key can never climb out of the cache root.
    pub fn parse(path: &str) -> ProxyResult<Self> {
        if path.is_empty() {
            return Err(ProxyError::BadRequest("empty module path".to_string()));
        }
        if path.contains('\\') {
            return Err(ProxyError::BadRequest(format!("invalid module path {path:?}")));
        }
        for elem in path.split('/') {
            if elem.is_empty() || elem == "." || elem == ".." {
                return Err(ProxyError::BadRequest(format!(
                    "invalid module path {path:?}"
                )));
            }
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The version part of a request before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Only lowercase hex digits: probably a commit hash prefix.
    Abbreviated,
    /// Anything else: a tag, a branch, `latest`, a full pseudo-version.
    Exact,
}

/// True when every byte of `token` is in `0-9a-f`. Vacuously true for the
/// empty string; callers treat an empty token as matching nothing.
pub fn is_hex(token: &str) -> bool {
    token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn classify(token: &str) -> TokenKind {
    if is_hex(token) {
        TokenKind::Abbreviated
    } else {
        TokenKind::Exact
    }
}

/// Reject tokens that would escape the `@v` directory.
pub fn check_token(token: &str) -> ProxyResult<()> {
    if token.is_empty() || token == "." || token == ".." || token.contains(['/', '\\']) {
        return Err(ProxyError::BadRequest(format!("invalid version {token:?}")));
    }
    Ok(())
}

/// The revision fragment after the last `-`, if any.
pub fn revision_suffix(version: &str) -> Option<&str> {
    version.rfind('-').map(|i| &version[i + 1..])
}

/// Commit time embedded in a pseudo-version.
///
/// Pseudo-versions have three `-` separated segments:
/// `v0.0.0-20180517173623-c85619274f5d`, `v1.2.4-0.20180517173623-c85619274f5d`
/// or `v1.2.3-pre.0.20180517173623-c85619274f5d`. The timestamp is the part of
/// the middle segment after its last `.`, and must be exactly 14 digits.
pub fn pseudo_version_time(version: &str) -> Option<DateTime<Utc>> {
    let mut parts = version.rsplitn(3, '-');
    let _revision = parts.next()?;
    let middle = parts.next()?;
    let base = parts.next()?;
    if base.is_empty() || base.contains('-') {
        return None;
    }

    let stamp = middle.rsplit('.').next()?;
    if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}

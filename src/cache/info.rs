//! `.info` metadata files and create-only cache writes

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::cache::layout::{ArtifactKind, CacheLayout};
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::util::is_not_exist;
use crate::core::version::{pseudo_version_time, ModuleKey};

/// Body of a `<version>.info` file, as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Time")]
    pub time: String,
}

impl VersionInfo {
    pub fn new(version: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            time: time.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Metadata for a version the origin did not describe. Pseudo-versions
    /// carry their commit time; anything else is stamped with `now`.
    pub fn synthesize(version: &str, now: DateTime<Utc>) -> Self {
        let time = pseudo_version_time(version).unwrap_or(now);
        Self::new(version, time)
    }
}

/// Write `.info` for `version` unless it already exists. Returns whether a
/// file was written.
pub fn ensure_info(layout: &CacheLayout, module: &ModuleKey, version: &str) -> ProxyResult<bool> {
    let path = layout.locate(module, version, ArtifactKind::Info)?;
    if !is_not_exist(&path) {
        return Ok(false);
    }

    let info = VersionInfo::synthesize(version, Utc::now());
    let body = serde_json::to_vec(&info)
        .map_err(|e| ProxyError::cache_io(&path, std::io::Error::other(e)))?;
    let written = write_create_only(&path, &body)?;
    if written {
        tracing::info!(module = %module, version, time = %info.time, "synthesized version info");
    }
    Ok(written)
}

/// Atomically create `path` with `contents`. The data goes to a temporary
/// file in the same directory first, then is linked into place without
/// replacing anything already there, so readers see the whole file or none.
pub fn write_create_only(path: &Path, contents: &[u8]) -> ProxyResult<bool> {
    let dir = match path.parent() {
        Some(dir) => dir,
        None => return Err(ProxyError::BadRequest(format!("no parent for {}", path.display()))),
    };
    std::fs::create_dir_all(dir).map_err(|e| ProxyError::cache_io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ProxyError::cache_io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ProxyError::cache_io(tmp.path(), e))?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ProxyError::cache_io(path, e.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_synthesize_pseudo_version() {
        let info = VersionInfo::synthesize("v0.0.0-20180517173623-c85619274f5d", Utc::now());
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"Version":"v0.0.0-20180517173623-c85619274f5d","Time":"2018-05-17T17:36:23Z"}"#
        );
    }

    #[test]
    fn test_synthesize_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let info = VersionInfo::synthesize("v1.2.3", now);
        assert_eq!(info.time, "2024-01-02T03:04:05Z");

        let info = VersionInfo::synthesize("v0.0.0-2018-c85619274f5d", now);
        assert_eq!(info.time, "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_ensure_info_writes_once() {
        let temp = tempdir().unwrap();
        let layout = CacheLayout::new(temp.path());
        let module = ModuleKey::parse("github.com/org/repo").unwrap();
        let version = "v0.0.0-20180517173623-c85619274f5d";

        assert!(ensure_info(&layout, &module, version).unwrap());
        let path = layout.locate(&module, version, ArtifactKind::Info).unwrap();
        let info: VersionInfo = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(info.version, version);
        assert_eq!(info.time, "2018-05-17T17:36:23Z");

        assert!(!ensure_info(&layout, &module, version).unwrap());
    }

    #[test]
    fn test_write_create_only_never_overwrites() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a/@v/v1.0.0.info");

        assert!(write_create_only(&path, b"first").unwrap());
        assert!(!write_create_only(&path, b"second").unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }
}

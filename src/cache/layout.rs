//! Cache layout - Maps (module, version, kind) to files under the cache root
//!
//! The layout is shared with the go tool and must not change:
//!
//! ```text
//! <root>/<escaped module>/@v/list
//! <root>/<escaped module>/@v/<escaped version>.info
//! <root>/<escaped module>/@v/<escaped version>.mod
//! <root>/<escaped module>/@v/<escaped version>.zip
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::error::{ProxyError, ProxyResult};
use crate::core::escape;
use crate::core::version::ModuleKey;

pub const LIST_FILE: &str = "list";
pub const VERSION_DIR: &str = "@v";

/// The four artifact kinds a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    List,
    Info,
    Mod,
    Zip,
}

impl ArtifactKind {
    /// Extension appended to the escaped version. `List` has none.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::List => "",
            ArtifactKind::Info => ".info",
            ArtifactKind::Mod => ".mod",
            ArtifactKind::Zip => ".zip",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".info" => Some(ArtifactKind::Info),
            ".mod" => Some(ArtifactKind::Mod),
            ".zip" => Some(ArtifactKind::Zip),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::List | ArtifactKind::Mod => "text/plain; charset=utf-8",
            ArtifactKind::Info => "application/json",
            ArtifactKind::Zip => "application/zip",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::List => f.write_str(LIST_FILE),
            other => f.write_str(other.extension()),
        }
    }
}

/// Root of the module download cache.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<escaped module>/@v`
    pub fn version_dir(&self, module: &ModuleKey) -> ProxyResult<PathBuf> {
        let escaped = escape::encode(module.as_str())?;
        let mut path = self.root.clone();
        path.extend(escaped.split('/'));
        path.push(VERSION_DIR);
        Ok(path)
    }

    pub fn list_path(&self, module: &ModuleKey) -> ProxyResult<PathBuf> {
        Ok(self.version_dir(module)?.join(LIST_FILE))
    }

    /// Pure path derivation; nothing is checked on disk.
    pub fn locate(&self, module: &ModuleKey, version: &str, kind: ArtifactKind) -> ProxyResult<PathBuf> {
        if kind == ArtifactKind::List {
            return self.list_path(module);
        }
        if version.is_empty() {
            return Err(ProxyError::BadRequest(format!(
                "{kind} artifact of {module} needs a version"
            )));
        }
        let escaped = escape::encode(version)?;
        Ok(self
            .version_dir(module)?
            .join(format!("{}{}", escaped, kind.extension())))
    }
}

//! Request flow
//!
//! Ties the pieces together: parse a request path, resolve the token against
//! cached versions, serve from disk on a hit, and go through the fetch
//! coordinator on a miss.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;

use crate::backends::origin::Origin;
use crate::cache::info::ensure_info;
use crate::cache::layout::{ArtifactKind, CacheLayout, LIST_FILE};
use crate::cache::versions::VersionCache;
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::escape;
use crate::core::util::is_not_exist;
use crate::core::version::{check_token, ModuleKey};
use crate::fetch::FetchCoordinator;
use crate::resolve::{resolve, Resolution};

const VERSION_SEGMENT: &str = "/@v/";

/// A parsed `/{module}/@v/{file}` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub module: ModuleKey,
    /// Empty for `list`
    pub token: String,
    pub kind: ArtifactKind,
}

impl ArtifactRequest {
    /// Parse a raw URL path. The whole path is percent-decoded and then
    /// case-decoded before it is split, so both the module and the token come
    /// out in their original spelling.
    pub fn parse(raw: &str) -> ProxyResult<Self> {
        let unescaped = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| ProxyError::BadRequest(format!("invalid UTF-8 in {raw:?}")))?;
        let path = escape::decode(unescaped.trim_start_matches('/'))
            .ok_or_else(|| ProxyError::Codec(unescaped.to_string()))?;

        let (module, file) = path
            .split_once(VERSION_SEGMENT)
            .ok_or_else(|| ProxyError::BadRequest(format!("no {VERSION_SEGMENT} in {raw:?}")))?;
        let module = ModuleKey::parse(module)?;

        if file == LIST_FILE {
            return Ok(Self {
                module,
                token: String::new(),
                kind: ArtifactKind::List,
            });
        }

        let dot = file
            .rfind('.')
            .ok_or_else(|| ProxyError::BadRequest(format!("no extension in {file:?}")))?;
        let kind = ArtifactKind::from_extension(&file[dot..])
            .ok_or_else(|| ProxyError::BadRequest(format!("unknown artifact {file:?}")))?;
        let token = &file[..dot];
        check_token(token)?;

        Ok(Self {
            module,
            token: token.to_string(),
            kind,
        })
    }
}

/// Bytes to send back for one request.
#[derive(Debug)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub body: Vec<u8>,
}

/// Shared handle that every request goes through. Built once at startup.
pub struct Proxy {
    layout: CacheLayout,
    versions: Arc<VersionCache>,
    fetcher: FetchCoordinator,
}

impl Proxy {
    pub fn new(layout: CacheLayout, origin: Arc<dyn Origin>, timeout: Duration) -> Self {
        let versions = Arc::new(VersionCache::new(layout.clone()));
        let fetcher = FetchCoordinator::new(layout.clone(), Arc::clone(&versions), origin, timeout);
        Self {
            layout,
            versions,
            fetcher,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    #[cfg(test)]
    pub(crate) fn fetcher(&self) -> &FetchCoordinator {
        &self.fetcher
    }

    /// Cache-only resolution. Never contacts the origin.
    pub fn lookup(&self, module: &ModuleKey, token: &str) -> ProxyResult<Resolution> {
        self.versions
            .with_versions(module, |known| resolve(token, known))
    }

    /// Path of the artifact for `module@token`, fetching it first if it is not
    /// on disk yet.
    pub fn artifact_path(&self, module: &ModuleKey, token: &str, kind: ArtifactKind) -> ProxyResult<PathBuf> {
        if kind == ArtifactKind::List {
            self.fetcher.fetch_shared(module, "latest")?;
            return self.layout.list_path(module);
        }

        let best = self.lookup(module, token)?;
        let path = self.layout.locate(module, &best.version, kind)?;
        if !is_not_exist(&path) {
            tracing::debug!(module = %module, token, version = %best.version, "cache hit");
            return Ok(path);
        }

        let resolved = self.fetcher.fetch_unless(module, &best.version, || {
            let again = self.lookup(module, token)?;
            let path = self.layout.locate(module, &again.version, kind)?;
            Ok((!is_not_exist(&path)).then_some(again.version))
        })?;

        let path = self.layout.locate(module, &resolved, kind)?;
        if kind == ArtifactKind::Info && is_not_exist(&path) {
            ensure_info(&self.layout, module, &resolved)?;
        }
        Ok(path)
    }

    /// Resolve and read the response body for `request`.
    pub fn serve(&self, request: &ArtifactRequest) -> ProxyResult<Artifact> {
        let path = self.artifact_path(&request.module, &request.token, request.kind)?;

        let body = match std::fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && request.kind == ArtifactKind::List => {
                // The origin may resolve `latest` without writing a list file.
                let versions = self.versions.snapshot(&request.module)?;
                versions.iter().map(|v| format!("{v}\n")).collect::<String>().into_bytes()
            }
            Err(e) => return Err(ProxyError::cache_io(&path, e)),
        };

        Ok(Artifact {
            kind: request.kind,
            path,
            body,
        })
    }
}

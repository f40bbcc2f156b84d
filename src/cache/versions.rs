//! Version list cache - Known versions per module
//!
//! Each module gets one entry, created on first access and seeded from the
//! module's on-disk `@v/list`. Entries live for the whole process. The
//! sequence never holds duplicates and only grows: after a fetch, versions the
//! go tool added to `list` are appended, then the resolved version.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::cache::layout::CacheLayout;
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::version::ModuleKey;

type Entry = Arc<RwLock<Vec<String>>>;

pub struct VersionCache {
    layout: CacheLayout,
    entries: Mutex<HashMap<ModuleKey, Entry>>,
}

impl VersionCache {
    pub fn new(layout: CacheLayout) -> Self {
        Self {
            layout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, module: &ModuleKey) -> ProxyResult<Entry> {
        if let Some(entry) = self.lookup(module) {
            return Ok(entry);
        }

        // Seed outside the map lock so a slow disk read only stalls this module.
        let seeded = read_list_file(&self.layout.list_path(module)?)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(module.clone())
            .or_insert_with(|| Arc::new(RwLock::new(dedup(seeded))));
        Ok(Arc::clone(entry))
    }

    fn lookup(&self, module: &ModuleKey) -> Option<Entry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
    }

    /// Run `f` over the known versions while holding the shared lock.
    pub fn with_versions<R>(&self, module: &ModuleKey, f: impl FnOnce(&[String]) -> R) -> ProxyResult<R> {
        let entry = self.entry(module)?;
        let versions = entry.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&versions))
    }

    pub fn snapshot(&self, module: &ModuleKey) -> ProxyResult<Vec<String>> {
        self.with_versions(module, |versions| versions.to_vec())
    }

    /// Merge the on-disk list and `resolved` into the entry after a fetch.
    pub fn record(&self, module: &ModuleKey, resolved: &str) -> ProxyResult<()> {
        let entry = self.entry(module)?;
        let on_disk = read_list_file(&self.layout.list_path(module)?)?;

        let mut versions = entry.write().unwrap_or_else(PoisonError::into_inner);
        let before = versions.len();
        for version in on_disk.iter().map(String::as_str).chain([resolved]) {
            if !version.is_empty() && !versions.iter().any(|v| v == version) {
                versions.push(version.to_string());
            }
        }
        tracing::debug!(
            module = %module,
            added = versions.len() - before,
            total = versions.len(),
            "version list updated"
        );
        Ok(())
    }
}

/// Read a `list` file, one version per line. A missing file is an empty list.
pub fn read_list_file(path: &Path) -> ProxyResult<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ProxyError::cache_io(path, e)),
    };

    let mut versions = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ProxyError::cache_io(path, e))?;
        let line = line.trim();
        if !line.is_empty() {
            versions.push(line.to_string());
        }
    }
    Ok(versions)
}

fn dedup(versions: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(versions.len());
    for v in versions {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

//! Fetch coordination
//!
//! Origin calls for one module run strictly one at a time. Each module gets a
//! lock on first use, kept for the life of the process. Different modules
//! fetch in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::backends::origin::Origin;
use crate::cache::info::ensure_info;
use crate::cache::layout::CacheLayout;
use crate::cache::versions::VersionCache;
use crate::core::error::ProxyResult;
use crate::core::version::{classify, ModuleKey, TokenKind};

/// The last successful fetch of a module.
#[derive(Debug, Clone)]
struct CompletedFetch {
    token: String,
    resolved: String,
}

/// Fetch state for one module. `last` is locked for the whole origin call;
/// `generation` counts successful fetches and can be read without waiting.
#[derive(Default)]
pub struct ModuleFetch {
    last: Mutex<Option<CompletedFetch>>,
    generation: AtomicU64,
}

impl ModuleFetch {
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.last.try_lock().is_ok()
    }
}

/// Registry of per-module fetch locks.
#[derive(Default)]
pub struct FetchLocks {
    modules: Mutex<HashMap<ModuleKey, Arc<ModuleFetch>>>,
}

impl FetchLocks {
    pub fn get(&self, module: &ModuleKey) -> Arc<ModuleFetch> {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(modules.entry(module.clone()).or_default())
    }

    /// Number of modules that have ever been fetched
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct FetchCoordinator {
    layout: CacheLayout,
    versions: Arc<VersionCache>,
    origin: Arc<dyn Origin>,
    timeout: Duration,
    locks: FetchLocks,
}

impl FetchCoordinator {
    pub fn new(
        layout: CacheLayout,
        versions: Arc<VersionCache>,
        origin: Arc<dyn Origin>,
        timeout: Duration,
    ) -> Self {
        Self {
            layout,
            versions,
            origin,
            timeout,
            locks: FetchLocks::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &FetchLocks {
        &self.locks
    }

    /// Fetch `module@token` from the origin and return the concrete version.
    pub fn fetch(&self, module: &ModuleKey, token: &str) -> ProxyResult<String> {
        self.fetch_unless(module, token, || Ok(None))
    }

    /// Like [`fetch`](Self::fetch), but `satisfied` runs first while the lock
    /// is held. If a fetch that finished while we waited already produced
    /// what the caller needs, `satisfied` returns that version and the origin
    /// is not called again.
    pub fn fetch_unless<F>(&self, module: &ModuleKey, token: &str, satisfied: F) -> ProxyResult<String>
    where
        F: FnOnce() -> ProxyResult<Option<String>>,
    {
        let slot = self.locks.get(module);
        self.locked(module, &slot, token, |_| satisfied())
    }

    /// Fetch `module@token`, unless a fetch of the same token finished while
    /// this call waited for the lock. Queued callers then share its result.
    /// Used for tokens such as `latest` that never become a cache hit.
    pub fn fetch_shared(&self, module: &ModuleKey, token: &str) -> ProxyResult<String> {
        let slot = self.locks.get(module);
        let seen = slot.generation();
        self.locked(module, &slot, token, |last| {
            Ok(match last {
                Some(done) if slot.generation() != seen && done.token == token => {
                    Some(done.resolved.clone())
                }
                _ => None,
            })
        })
    }

    fn locked<F>(&self, module: &ModuleKey, slot: &ModuleFetch, token: &str, satisfied: F) -> ProxyResult<String>
    where
        F: FnOnce(Option<&CompletedFetch>) -> ProxyResult<Option<String>>,
    {
        let wait = Instant::now();
        let mut last = slot.last.lock().unwrap_or_else(PoisonError::into_inner);
        let waited = wait.elapsed();
        if waited > Duration::from_millis(10) {
            tracing::debug!(module = %module, waited_ms = waited.as_millis() as u64, "acquired fetch lock");
        }

        if let Some(version) = satisfied(last.as_ref())? {
            tracing::debug!(module = %module, token, version = %version, "satisfied by earlier fetch");
            return Ok(version);
        }

        let resolved = self.fetch_locked(module, token)?;
        *last = Some(CompletedFetch {
            token: token.to_string(),
            resolved: resolved.clone(),
        });
        slot.generation.fetch_add(1, Ordering::SeqCst);
        Ok(resolved)
    }

    fn fetch_locked(&self, module: &ModuleKey, token: &str) -> ProxyResult<String> {
        let start = Instant::now();
        let report = self.origin.fetch(module, token, self.timeout).map_err(|e| {
            tracing::warn!(module = %module, token, code = e.code(), "origin fetch failed");
            e
        })?;
        let resolved = report.resolved_version(module, token);

        if resolved != token && classify(token) == TokenKind::Abbreviated {
            ensure_info(&self.layout, module, &resolved)?;
        }
        self.versions.record(module, &resolved)?;

        tracing::info!(
            module = %module,
            token,
            resolved = %resolved,
            duration_ms = start.elapsed().as_millis() as u64,
            "fetched from origin"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backends::origin::OriginReport;
    use crate::cache::layout::ArtifactKind;
    use crate::core::error::ProxyError;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tempfile::tempdir;

    /// Origin double that records calls and writes artifacts like the go tool.
    pub(crate) struct FakeOrigin {
        pub layout: CacheLayout,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub delay: Duration,
        /// token -> resolved version; unknown tokens resolve to themselves
        pub resolutions: HashMap<String, String>,
        /// tokens that fail with the given error text
        pub failures: HashMap<String, String>,
        /// report through progress text instead of structured output
        pub progress_only: bool,
    }

    impl FakeOrigin {
        pub(crate) fn new(layout: CacheLayout) -> Self {
            Self {
                layout,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: Duration::ZERO,
                resolutions: HashMap::new(),
                failures: HashMap::new(),
                progress_only: false,
            }
        }

        pub(crate) fn resolve(mut self, token: &str, version: &str) -> Self {
            self.resolutions.insert(token.to_string(), version.to_string());
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Origin for FakeOrigin {
        fn fetch(&self, module: &ModuleKey, token: &str, timeout: Duration) -> ProxyResult<OriginReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.delay > timeout {
                return Err(ProxyError::FetchTimeout {
                    target: format!("{module}@{token}"),
                    seconds: timeout.as_secs(),
                });
            }
            if let Some(text) = self.failures.get(token) {
                return Err(crate::backends::progress::failure(text));
            }

            let version = self
                .resolutions
                .get(token)
                .cloned()
                .unwrap_or_else(|| token.to_string());
            for kind in [ArtifactKind::Mod, ArtifactKind::Zip] {
                let path = self.layout.locate(module, &version, kind).unwrap();
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, format!("{kind} of {module}@{version}")).unwrap();
            }
            let list = self.layout.list_path(module).unwrap();
            if !version.contains('-') {
                let mut current = std::fs::read_to_string(&list).unwrap_or_default();
                if !current.lines().any(|l| l == version) {
                    current.push_str(&version);
                    current.push('\n');
                    std::fs::write(&list, current).unwrap();
                }
            }

            if self.progress_only {
                Ok(OriginReport::progress(format!(
                    "go: downloading golang.org/x/text v0.3.0\ngo: downloading {module} {version}\n"
                )))
            } else {
                Ok(OriginReport::structured(version))
            }
        }
    }

    fn key(s: &str) -> ModuleKey {
        ModuleKey::parse(s).unwrap()
    }

    fn coordinator(origin: Arc<FakeOrigin>, timeout: Duration) -> (FetchCoordinator, Arc<VersionCache>) {
        let layout = origin.layout.clone();
        let versions = Arc::new(VersionCache::new(layout.clone()));
        (
            FetchCoordinator::new(layout, Arc::clone(&versions), origin, timeout),
            versions,
        )
    }

    const PSEUDO: &str = "v0.0.0-20180517173623-c85619274f5d";

    #[test]
    fn test_fetch_records_resolved_version() {
        let temp = tempdir().unwrap();
        let origin = Arc::new(FakeOrigin::new(CacheLayout::new(temp.path())).resolve("latest", "v1.2.0"));
        let (fetcher, versions) = coordinator(Arc::clone(&origin), Duration::from_secs(5));
        let module = key("github.com/org/repo");

        assert_eq!(fetcher.fetch(&module, "latest").unwrap(), "v1.2.0");
        assert_eq!(versions.snapshot(&module).unwrap(), vec!["v1.2.0"]);
        assert_eq!(origin.calls(), 1);
        assert_eq!(fetcher.locks().len(), 1);
    }

    #[test]
    fn test_progress_text_resolution_and_info_synthesis() {
        let temp = tempdir().unwrap();
        let layout = CacheLayout::new(temp.path());
        let mut fake = FakeOrigin::new(layout.clone()).resolve("c85619", PSEUDO);
        fake.progress_only = true;
        let (fetcher, versions) = coordinator(Arc::new(fake), Duration::from_secs(5));
        let module = key("github.com/org/repo");

        assert_eq!(fetcher.fetch(&module, "c85619").unwrap(), PSEUDO);
        let info = std::fs::read_to_string(layout.locate(&module, PSEUDO, ArtifactKind::Info).unwrap()).unwrap();
        assert_eq!(
            info,
            r#"{"Version":"v0.0.0-20180517173623-c85619274f5d","Time":"2018-05-17T17:36:23Z"}"#
        );
        assert_eq!(versions.snapshot(&module).unwrap(), vec![PSEUDO]);
    }

    #[test]
    fn test_no_synthesis_for_exact_tokens() {
        let temp = tempdir().unwrap();
        let layout = CacheLayout::new(temp.path());
        let fake = FakeOrigin::new(layout.clone()).resolve("master", PSEUDO);
        let (fetcher, _) = coordinator(Arc::new(fake), Duration::from_secs(5));
        let module = key("github.com/org/repo");

        assert_eq!(fetcher.fetch(&module, "master").unwrap(), PSEUDO);
        assert!(!layout.locate(&module, PSEUDO, ArtifactKind::Info).unwrap().exists());
    }

    #[test]
    fn test_existing_info_is_not_overwritten() {
        let temp = tempdir().unwrap();
        let layout = CacheLayout::new(temp.path());
        let module = key("github.com/org/repo");
        let path = layout.locate(&module, PSEUDO, ArtifactKind::Info).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "origin info").unwrap();

        let fake = FakeOrigin::new(layout.clone()).resolve("c85619", PSEUDO);
        let (fetcher, _) = coordinator(Arc::new(fake), Duration::from_secs(5));
        fetcher.fetch(&module, "c85619").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "origin info");
    }

    #[test]
    fn test_same_module_fetches_are_serialized() {
        let temp = tempdir().unwrap();
        let mut fake = FakeOrigin::new(CacheLayout::new(temp.path()));
        fake.delay = Duration::from_millis(100);
        let origin = Arc::new(fake);
        let (fetcher, _) = coordinator(Arc::clone(&origin), Duration::from_secs(5));
        let fetcher = Arc::new(fetcher);
        let module = key("github.com/org/repo");

        let handles: Vec<_> = ["v1.0.0", "v1.1.0", "v1.2.0"]
            .into_iter()
            .map(|token| {
                let fetcher = Arc::clone(&fetcher);
                let module = module.clone();
                thread::spawn(move || fetcher.fetch(&module, token).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(origin.calls(), 3);
        assert_eq!(origin.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_modules_fetch_in_parallel() {
        let temp = tempdir().unwrap();
        let mut fake = FakeOrigin::new(CacheLayout::new(temp.path()));
        fake.delay = Duration::from_millis(300);
        let origin = Arc::new(fake);
        let (fetcher, _) = coordinator(Arc::clone(&origin), Duration::from_secs(5));
        let fetcher = Arc::new(fetcher);

        let handles: Vec<_> = ["example.com/a", "example.com/b"]
            .into_iter()
            .map(|m| {
                let fetcher = Arc::clone(&fetcher);
                thread::spawn(move || fetcher.fetch(&key(m), "v1.0.0").unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(origin.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shared_fetch_reuses_result_for_queued_callers() {
        let temp = tempdir().unwrap();
        let mut fake = FakeOrigin::new(CacheLayout::new(temp.path())).resolve("latest", "v1.2.0");
        fake.delay = Duration::from_millis(200);
        let origin = Arc::new(fake);
        let (fetcher, _) = coordinator(Arc::clone(&origin), Duration::from_secs(5));
        let fetcher = Arc::new(fetcher);
        let module = key("github.com/org/repo");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fetcher = Arc::clone(&fetcher);
                let module = module.clone();
                thread::spawn(move || fetcher.fetch_shared(&module, "latest").unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "v1.2.0");
        }

        assert_eq!(origin.calls(), 1);
        assert_eq!(fetcher.locks().get(&module).generation(), 1);
    }

    #[test]
    fn test_shared_fetch_does_not_reuse_stale_or_other_tokens() {
        let temp = tempdir().unwrap();
        let origin = Arc::new(FakeOrigin::new(CacheLayout::new(temp.path())).resolve("latest", "v1.2.0"));
        let (fetcher, _) = coordinator(Arc::clone(&origin), Duration::from_secs(5));
        let module = key("github.com/org/repo");

        // Sequential calls never waited on another fetch, so each one runs.
        fetcher.fetch_shared(&module, "latest").unwrap();
        fetcher.fetch_shared(&module, "latest").unwrap();
        assert_eq!(origin.calls(), 2);

        fetcher.fetch(&module, "v1.0.0").unwrap();
        assert_eq!(fetcher.fetch_shared(&module, "latest").unwrap(), "v1.2.0");
        assert_eq!(origin.calls(), 4);
    }

    #[test]
    fn test_satisfied_skips_origin() {
        let temp = tempdir().unwrap();
        let origin = Arc::new(FakeOrigin::new(CacheLayout::new(temp.path())));
        let (fetcher, _) = coordinator(Arc::clone(&origin), Duration::from_secs(5));

        let version = fetcher
            .fetch_unless(&key("example.com/a"), "c856", || Ok(Some(PSEUDO.to_string())))
            .unwrap();
        assert_eq!(version, PSEUDO);
        assert_eq!(origin.calls(), 0);
    }

    #[test]
    fn test_timeout_releases_lock() {
        let temp = tempdir().unwrap();
        let mut fake = FakeOrigin::new(CacheLayout::new(temp.path()));
        fake.delay = Duration::from_millis(200);
        let origin = Arc::new(fake);
        let (fetcher, _) = coordinator(Arc::clone(&origin), Duration::from_millis(50));
        let module = key("example.com/slow");

        assert!(matches!(
            fetcher.fetch(&module, "v1.0.0"),
            Err(ProxyError::FetchTimeout { .. })
        ));
        assert!(fetcher.locks().get(&module).is_idle());
        assert_eq!(fetcher.locks().get(&module).generation(), 0);
        assert!(matches!(
            fetcher.fetch(&module, "v1.0.0"),
            Err(ProxyError::FetchTimeout { .. })
        ));
        assert_eq!(origin.calls(), 2);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let temp = tempdir().unwrap();
        let mut fake = FakeOrigin::new(CacheLayout::new(temp.path()));
        fake.failures.insert(
            "deadbeef".to_string(),
            "go: example.com/a@deadbeef: unknown revision deadbeef".to_string(),
        );
        let origin = Arc::new(fake);
        let (fetcher, versions) = coordinator(Arc::clone(&origin), Duration::from_secs(5));
        let module = key("example.com/a");

        for _ in 0..2 {
            assert!(matches!(
                fetcher.fetch(&module, "deadbeef"),
                Err(ProxyError::NotFound(_))
            ));
        }
        assert_eq!(origin.calls(), 2);
        assert!(versions.snapshot(&module).unwrap().is_empty());
    }
}

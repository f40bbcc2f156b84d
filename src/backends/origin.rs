//! Origin interface
//!
//! The origin is whatever actually downloads and verifies a module and writes
//! its artifacts into the cache. The proxy only needs it to say which version
//! it resolved `module@token` to.

use std::time::Duration;

use crate::backends::progress::downloaded_version;
use crate::core::error::ProxyResult;
use crate::core::version::ModuleKey;

/// What a successful origin call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginReport {
    /// Version reported through structured output, if the origin has any.
    pub resolved: Option<String>,
    /// Free-form progress text, scanned when `resolved` is absent.
    pub progress: String,
}

impl OriginReport {
    pub fn structured(version: impl Into<String>) -> Self {
        Self {
            resolved: Some(version.into()),
            progress: String::new(),
        }
    }

    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            resolved: None,
            progress: text.into(),
        }
    }

    /// The concrete version for `module`. Falls back to `token` when the
    /// origin did not mention the module at all.
    pub fn resolved_version(&self, module: &ModuleKey, token: &str) -> String {
        self.resolved
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| downloaded_version(&self.progress, module))
            .unwrap_or_else(|| token.to_string())
    }
}

pub trait Origin: Send + Sync {
    /// Download `module@token` into the cache, giving up after `timeout`.
    fn fetch(&self, module: &ModuleKey, token: &str, timeout: Duration) -> ProxyResult<OriginReport>;
}

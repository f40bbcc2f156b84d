//! Scanning go tool output
//!
//! `go get` only reports what it resolved through progress lines such as
//! `go: downloading github.com/org/repo v1.2.3`. These helpers pull the
//! resolved version for one module out of that text and sort failures into
//! not-found versus everything else.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::error::ProxyError;
use crate::core::version::ModuleKey;

static NOT_FOUND_RE: Lazy<Regex> = Lazy::new(|| {
    // Only go's own wording; "not found" alone also matches missing tools
    // such as `git: command not found`.
    Regex::new(
        r"(?im)unknown revision|no matching versions|invalid version|\b404 not found\b|\b410 gone\b|^go: module \S+: not found$",
    )
    .expect("Invalid NOT_FOUND_RE regex")
});

/// Version reported for exactly `module` by a `downloading` line.
///
/// Lines must have four whitespace-separated fields with `downloading` second
/// and the module third. Lines about dependencies are ignored.
pub fn downloaded_version(progress: &str, module: &ModuleKey) -> Option<String> {
    progress.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_, "downloading", path, version] if *path == module.as_str() => {
                Some((*version).to_string())
            }
            _ => None,
        }
    })
}

/// Turn the go tool's diagnostic text into an error, keeping it verbatim.
pub fn failure(diagnostic: &str) -> ProxyError {
    if NOT_FOUND_RE.is_match(diagnostic) {
        ProxyError::NotFound(diagnostic.to_string())
    } else {
        ProxyError::OriginFailure(diagnostic.to_string())
    }
}

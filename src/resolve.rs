//! Token resolution against cached versions
//!
//! Decides, without touching the origin, whether a requested version token
//! already names a known version.

use crate::core::version::{classify, revision_suffix, TokenKind};

/// Outcome of matching a token against the known versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The matched version, or the token unchanged when nothing matched.
    pub version: String,
    pub found: bool,
}

impl Resolution {
    fn miss(token: &str) -> Self {
        Self {
            version: token.to_string(),
            found: false,
        }
    }
}

/// Match `token` against `known`, which is ordered oldest first.
///
/// An exact token must be present literally. A lowercase-hex token is compared
/// with the revision fragment after the last `-` of each version, newest
/// first; either may be a prefix of the other.
pub fn resolve(token: &str, known: &[String]) -> Resolution {
    if token.is_empty() {
        return Resolution::miss(token);
    }

    match classify(token) {
        TokenKind::Exact => {
            if known.iter().any(|v| v == token) {
                Resolution {
                    version: token.to_string(),
                    found: true,
                }
            } else {
                Resolution::miss(token)
            }
        }
        TokenKind::Abbreviated => known
            .iter()
            .rev()
            .find(|v| match revision_suffix(v) {
                Some(rev) if !rev.is_empty() => rev.starts_with(token) || token.starts_with(rev),
                _ => false,
            })
            .map(|v| Resolution {
                version: v.clone(),
                found: true,
            })
            .unwrap_or_else(|| Resolution::miss(token)),
    }
}

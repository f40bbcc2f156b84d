//! Proxy error taxonomy
//!
//! Every failure a request can hit maps to one of these kinds. The HTTP layer
//! only needs [`ProxyError::status`] and the `Display` text.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed request path, unknown extension or unsafe path element.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A path or version that cannot go through the case-escaping codec.
    #[error("cannot escape {0:?}: contains '!' or non-ASCII characters")]
    Codec(String),

    /// The origin reported that the module or revision does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The origin did not finish within its budget.
    #[error("fetching {target} timed out after {seconds}s")]
    FetchTimeout { target: String, seconds: u64 },

    /// The origin failed; the message is its diagnostic output, verbatim.
    #[error("{0}")]
    OriginFailure(String),

    #[error("cache I/O on {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProxyError {
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProxyError::CacheIo {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable code, used in CLI result items and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "BAD_REQUEST",
            ProxyError::Codec(_) => "CODEC",
            ProxyError::NotFound(_) => "NOT_FOUND",
            ProxyError::FetchTimeout { .. } => "FETCH_TIMEOUT",
            ProxyError::OriginFailure(_) => "ORIGIN_FAILURE",
            ProxyError::CacheIo { .. } => "CACHE_IO",
        }
    }

    /// Malformed input never reaches the origin and is answered with 404.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, ProxyError::BadRequest(_) | ProxyError::Codec(_))
    }

    pub fn status(&self) -> StatusCode {
        if self.is_bad_request() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

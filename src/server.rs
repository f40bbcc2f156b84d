//! HTTP surface
//!
//! Every GET is routed through one fallback handler; the path itself carries
//! the module, token and artifact kind. Core work is blocking (locks, child
//! processes, file I/O), so each request runs on the blocking pool. Once
//! started, a fetch runs to completion even if its client goes away, since
//! other requests may be queued behind it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;

use crate::core::error::ProxyError;
use crate::proxy::{ArtifactRequest, Proxy};

pub fn router(proxy: Arc<Proxy>) -> Router {
    Router::new().fallback(handle).with_state(proxy)
}

/// Accepts Go-style `:6633` as shorthand for all interfaces.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .with_context(|| format!("Invalid listen address: {}", addr))
}

pub async fn serve(proxy: Arc<Proxy>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        addr = %listener.local_addr().unwrap_or(addr),
        cache = %proxy.layout().root().display(),
        "module proxy listening"
    );

    axum::serve(listener, router(proxy))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("HTTP server failed")
}

async fn handle(State(proxy): State<Arc<Proxy>>, method: Method, uri: Uri) -> Response {
    let path = uri.path().to_string();
    if method != Method::GET {
        tracing::debug!(path = %path, method = %method, "rejected method");
        return StatusCode::NOT_FOUND.into_response();
    }

    let request = match ArtifactRequest::parse(&path) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "bad request");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    tracing::info!(path = %path, "request");

    let result = tokio::task::spawn_blocking(move || proxy.serve(&request)).await;
    match result {
        Ok(Ok(artifact)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, artifact.kind.content_type())],
            Body::from(artifact.body),
        )
            .into_response(),
        Ok(Err(e)) => error_response(&path, e),
        Err(e) => {
            tracing::error!(path = %path, error = %e, "request task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn error_response(path: &str, err: ProxyError) -> Response {
    if err.is_bad_request() {
        tracing::debug!(path, error = %err, "bad request");
        return StatusCode::NOT_FOUND.into_response();
    }
    match &err {
        ProxyError::NotFound(_) => tracing::warn!(path, code = err.code(), error = %err, "not found at origin"),
        _ => tracing::error!(path, code = err.code(), error = %err, "request failed"),
    }
    (err.status(), err.to_string()).into_response()
}

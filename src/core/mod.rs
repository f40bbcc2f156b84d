//! Core module - Shared types and utilities
//!
//! This module provides:
//! - The case-escaping path codec
//! - Module keys, version tokens and pseudo-version parsing
//! - The proxy error taxonomy
//! - The CLI result model and its renderers
//! - Common utilities

pub mod error;
pub mod escape;
pub mod model;
pub mod render;
pub mod util;
pub mod version;

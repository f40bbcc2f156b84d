//! Cache module - The on-disk module download cache
//!
//! Provides:
//! - Path derivation for list/info/mod/zip artifacts
//! - The per-module version list cache
//! - `.info` synthesis and create-only writes

pub mod info;
pub mod layout;
pub mod versions;

//! Backends module - Fetching modules from origin
//!
//! Provides:
//! - origin: The fetch seam used by the coordinator
//! - go: go toolchain origin (download/get modes)
//! - progress: Progress-line scanning and failure classification
//! - doctor: Environment checking

pub mod doctor;
pub mod go;
pub mod origin;
pub mod progress;

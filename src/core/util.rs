//! Common utilities

use std::io;
use std::path::Path;

/// Check if a command is available in PATH (or is a path to an existing file)
pub fn command_exists(cmd: &str) -> bool {
    if cmd.contains('/') {
        return Path::new(cmd).is_file();
    }
    std::process::Command::new("which")
        .arg(cmd)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// True only when `path` definitely does not exist. Other stat errors
/// (permissions, I/O) count as "exists" so callers go on to read the file
/// and surface the real error.
pub fn is_not_exist(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::NotFound,
    }
}

/// Truncate string to max bytes on a UTF-8 boundary
pub fn truncate_string(s: &str, max_bytes: usize) -> (&str, bool) {
    if s.len() <= max_bytes {
        return (s, false);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    (&s[..end], true)
}

//! Case-escaping codec for module paths and versions
//!
//! Module caches must work on case-insensitive filesystems, so every uppercase
//! ASCII letter `X` is stored as `!x`. Any other ASCII byte passes through.
//! Inputs containing `!` or non-ASCII bytes are refused so that the mapping
//! stays a bijection.

use crate::core::error::{ProxyError, ProxyResult};

const ESCAPE: u8 = b'!';

/// Escape uppercase letters in `s`.
pub fn encode(s: &str) -> ProxyResult<String> {
    if s.bytes().any(|b| b == ESCAPE || !b.is_ascii()) {
        return Err(ProxyError::Codec(s.to_string()));
    }
    if !s.bytes().any(|b| b.is_ascii_uppercase()) {
        return Ok(s.to_string());
    }

    let mut out = String::with_capacity(s.len() + 8);
    for b in s.bytes() {
        if b.is_ascii_uppercase() {
            out.push(ESCAPE as char);
            out.push(b.to_ascii_lowercase() as char);
        } else {
            out.push(b as char);
        }
    }
    Ok(out)
}

/// Reverse [`encode`]. Returns `None` for anything `encode` could not have
/// produced: a dangling `!`, `!` before a non-lowercase byte, a bare
/// uppercase letter, or non-ASCII input.
pub fn decode(encoded: &str) -> Option<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut bang = false;
    for b in encoded.bytes() {
        if !b.is_ascii() {
            return None;
        }
        if bang {
            bang = false;
            if !b.is_ascii_lowercase() {
                return None;
            }
            out.push(b.to_ascii_uppercase() as char);
            continue;
        }
        if b == ESCAPE {
            bang = true;
            continue;
        }
        if b.is_ascii_uppercase() {
            return None;
        }
        out.push(b as char);
    }
    if bang {
        return None;
    }
    Some(out)
}

//! Remote-path sanitisation.
//!
//! The service rejects uploads whose path contains any of a fixed character
//! set. Sanitisation strips them silently; the sanitised path is what the
//! server sees and what every later call must reuse. URL-encoding is not a
//! substitute: the service rejects the decoded characters either way.

/// Characters the remote service forbids in file paths.
const FORBIDDEN: &[char] = &[
    '\\', '?', '|', '"', '>', '<', ':', '*', '\t', '\n', '\r', '\0', '\x0B',
];

/// Strips forbidden characters from a remote path.
pub fn sanitize_remote_path(path: &str) -> String {
    let cleaned: String = path.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    if cleaned != path {
        tracing::debug!(original = path, sanitized = %cleaned, "remote path sanitized");
    }
    cleaned
}

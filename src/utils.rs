//! Small helpers shared across the crate
//!
//! Path expansion for `~`-prefixed config values, wall-clock seconds, and
//! redaction of secrets before they reach the logs.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of leading characters of a secret that may appear in logs
const REDACT_PREFIX_BYTES: usize = 8;

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes, ensuring the result
/// is valid UTF-8 by finding the last valid character boundary.
///
/// # Example
/// ```
/// use git_remote_iap::utils::safe_truncate;
///
/// let text = "Café";
/// assert_eq!(safe_truncate(text, 4), "Caf");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Redact a secret for logging, keeping only a short prefix.
///
/// # Example
/// ```
/// use git_remote_iap::utils::redact;
///
/// assert_eq!(redact("eyJhbGciOiJSUzI1NiJ9.payload.sig"), "eyJhbGci...");
/// assert_eq!(redact(""), "<empty>");
/// ```
#[must_use]
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    format!("{}...", safe_truncate(secret, REDACT_PREFIX_BYTES))
}

/// Expand a leading `~` to the current user's home directory.
///
/// Only `~` on its own or followed by a path separator is expanded;
/// `~user` forms are returned untouched, as are relative and absolute paths.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    let Some(rest) = path.strip_prefix('~') else {
        return PathBuf::from(path);
    };
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\')) {
        return PathBuf::from(path);
    }
    match dirs::home_dir() {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => {
            tracing::warn!(path, "No home directory found; using path as-is");
            PathBuf::from(path)
        }
    }
}

/// Current wall-clock time as Unix seconds
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_ascii() {
        let text = "Hello, World!";
        assert_eq!(safe_truncate(text, 7), "Hello, ");
        assert_eq!(safe_truncate(text, 100), text);
        assert_eq!(safe_truncate(text, 0), "");
    }

    #[test]
    fn test_safe_truncate_multibyte() {
        // 'é' is 2 bytes in UTF-8
        let text = "Café";
        assert_eq!(safe_truncate(text, 4), "Caf");
        assert_eq!(safe_truncate(text, 5), "Café");
    }

    #[test]
    fn test_redact_keeps_prefix_only() {
        let token = "1//0gLongRefreshTokenValue";
        let redacted = redact(token);
        assert_eq!(redacted, "1//0gLon...");
        assert!(!redacted.contains("RefreshTokenValue"));
    }

    #[test]
    fn test_expand_home_tilde() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home("~/.config/x.cookie"), home.join(".config/x.cookie"));
        assert_eq!(expand_home("~"), home);
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/tmp/jar"), PathBuf::from("/tmp/jar"));
        assert_eq!(expand_home("relative/jar"), PathBuf::from("relative/jar"));
        assert_eq!(expand_home("~bob/jar"), PathBuf::from("~bob/jar"));
        assert_eq!(expand_home(""), PathBuf::from(""));
    }

    #[test]
    fn test_now_unix_is_recent() {
        // 2020-01-01
        assert!(now_unix() > 1_577_836_800);
    }
}

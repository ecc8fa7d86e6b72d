//! Transport layer: handing the connection to git's HTTPS helper
//!
//! The helper never speaks the remote-helper protocol itself. Once a token is
//! in place it runs `git remote-https` as a child with inherited stdio, so the
//! protocol exchange goes straight between git and that child.

pub mod passthrough;

use std::path::Path;
use tokio::process::Command;

use crate::error::{IapError, Result};

/// First git release that understands `http.extraHeader`
pub const MIN_GIT_VERSION: &str = "2.9.0";

/// Query the installed git version
///
/// Returns the version string and whether it meets [`MIN_GIT_VERSION`].
///
/// # Errors
/// Returns `IapError::ProcessExec` if git cannot be run.
pub async fn check_git_version(git: &Path) -> Result<(String, bool)> {
    let output = Command::new(git)
        .arg("--version")
        .output()
        .await
        .map_err(|e| IapError::process_exec(format!("failed to get git version: {e}")))?;

    if !output.status.success() {
        return Err(IapError::process_exec("failed to get git version"));
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    let version = version_str.trim();

    // Handle formats like "git version 2.39.3 (Apple Git-146)"
    let version_num = version
        .split_whitespace()
        .find(|s| s.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(version);

    Ok((
        version_num.to_string(),
        !version_lt(version_num, MIN_GIT_VERSION),
    ))
}

/// Simple version comparison (returns true if v1 < v2)
fn version_lt(v1: &str, v2: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> {
        v.split('.')
            .map_while(|s| {
                let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect()
    };

    let v1_parts = parse(v1);
    let v2_parts = parse(v2);

    for i in 0..v1_parts.len().max(v2_parts.len()) {
        let p1 = v1_parts.get(i).copied().unwrap_or(0);
        let p2 = v2_parts.get(i).copied().unwrap_or(0);
        if p1 < p2 {
            return true;
        } else if p1 > p2 {
            return false;
        }
    }
    false
}

pub use passthrough::{Passthrough, exit_code, https_url};

//! Hand-off to git's own HTTPS remote helper

use std::convert::Infallible;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use url::Url;

use crate::error::{IapError, Result};
use crate::utils::redact;

/// Exit code used when the child's status carries no code
const UNKNOWN_EXIT: i32 = 1;

/// Runs `git remote-https` with the IAP token injected as a header
#[derive(Debug, Clone)]
pub struct Passthrough {
    program: PathBuf,
}

impl Passthrough {
    /// Locate `git` on `PATH`
    ///
    /// # Errors
    /// Returns `IapError::ProcessExec` if git cannot be found
    pub fn new() -> Result<Self> {
        Ok(Self {
            program: Self::find_git()?,
        })
    }

    /// Use a specific git binary
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Path of the git binary that will be run
    #[must_use]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn find_git() -> Result<PathBuf> {
        if let Ok(path) = which::which("git") {
            return Ok(path);
        }

        let locations = [
            "/usr/bin/git",
            "/usr/local/bin/git",
            "/opt/homebrew/bin/git",
        ];
        locations
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
            .ok_or_else(|| IapError::process_exec("git not found on PATH"))
    }

    /// Build `git -c http.extraHeader=... remote-https <remote> <https-url>`
    ///
    /// # Errors
    /// Returns `IapError::InvalidUrl` if the remote URL cannot be rewritten
    pub fn build_command(&self, remote: &str, url: &str, bearer_token: &str) -> Result<Command> {
        let https = https_url(url)?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(format!(
                "http.extraHeader=Proxy-Authorization: Bearer {bearer_token}"
            ))
            .arg("remote-https")
            .arg(remote)
            .arg(https.as_str());
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        tracing::debug!(
            program = %self.program.display(),
            remote,
            url = %https,
            token = %redact(bearer_token),
            "Handing off to git remote-https"
        );
        Ok(cmd)
    }

    /// Run the transport to completion and return its exit code
    ///
    /// # Errors
    /// Returns `IapError::ProcessExec` if the transport cannot be started
    pub async fn run(&self, remote: &str, url: &str, bearer_token: &str) -> Result<i32> {
        let mut cmd = self.build_command(remote, url, bearer_token)?;
        let status = cmd.status().await.map_err(|e| {
            IapError::process_exec(format!("{}: {e}", self.program.display()))
        })?;
        let code = exit_code(status);
        tracing::debug!(code, "git remote-https finished");
        Ok(code)
    }

    /// Run the transport and exit this process with its exit code
    ///
    /// # Errors
    /// Returns only if the transport could not be started
    pub async fn hand_off(&self, remote: &str, url: &str, bearer_token: &str) -> Result<Infallible> {
        let code = self.run(remote, url, bearer_token).await?;
        std::process::exit(code)
    }
}

/// Rewrite a `https+iap://` (or any `scheme://`) URL to plain `https://`
///
/// # Errors
/// Returns `IapError::InvalidUrl` if the URL has no `://` or is not valid
pub fn https_url(url: &str) -> Result<Url> {
    let (_, rest) = url
        .split_once("://")
        .ok_or_else(|| IapError::invalid_url(format!("'{url}' has no scheme")))?;
    Ok(Url::parse(&format!("https://{rest}"))?)
}

/// Map a child's status to the code this process should exit with
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT
}

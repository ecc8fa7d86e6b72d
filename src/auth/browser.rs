//! Launching the user's browser at the authorization URL

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{IapError, Result};

/// Opens an authorization URL for the user
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`
    ///
    /// # Errors
    /// Returns `IapError::BrowserFlow` if no browser could be started
    async fn open(&self, url: &str) -> Result<()>;
}

/// Platform default browser
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

#[async_trait]
impl BrowserLauncher for SystemBrowser {
    async fn open(&self, url: &str) -> Result<()> {
        let mut cmd = browser_command(url);
        // stdout belongs to git's remote-helper protocol
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.spawn()
            .map_err(|e| IapError::browser_flow(format!("could not open browser: {e}")))?;
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn browser_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn browser_command(url: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "", url]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn browser_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}

//! Refresh-token cache backed by git's credential store
//!
//! The long-lived refresh token is saved with the same `git credential-store`
//! helper git uses for passwords, addressed by a fixed protocol and username
//! plus the domain as host:
//!
//! ```text
//! protocol=iap
//! host=git.example.com
//! username=refresh-token
//! password=<refresh token>
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{IapError, Result};
use crate::types::Domain;

/// Protocol under which refresh tokens are stored. Arbitrary but fixed.
pub const CACHE_PROTOCOL: &str = "iap";

/// Username under which refresh tokens are stored. Arbitrary but fixed.
pub const CACHE_USERNAME: &str = "refresh-token";

/// Secret store for refresh tokens, keyed by domain
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Fetch the cached secret for `domain`
    ///
    /// # Errors
    /// Returns `IapError::CredentialCache` when nothing is stored or the
    /// helper fails. A miss is the normal first-run state.
    async fn get(&self, domain: &Domain) -> Result<String>;

    /// Store `secret` for `domain`
    ///
    /// # Errors
    /// Returns `IapError::CredentialCache` if the helper fails
    async fn set(&self, domain: &Domain, secret: &str) -> Result<()>;
}

/// [`CredentialCache`] over `git credential-store`
#[derive(Debug, Clone)]
pub struct GitCredentialStore {
    program: PathBuf,
    store_file: Option<PathBuf>,
}

impl Default for GitCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCredentialStore {
    /// Use `git` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            store_file: None,
        }
    }

    /// Use a specific git binary
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            store_file: None,
        }
    }

    /// Keep secrets in `path` instead of `~/.git-credentials`
    #[must_use]
    pub fn with_store_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_file = Some(path.into());
        self
    }

    async fn run(&self, action: &str, input: &str) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("credential-store");
        if let Some(file) = &self.store_file {
            cmd.arg("--file").arg(file);
        }
        let mut child = cmd
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IapError::credential_cache(format!("git credential-store: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes the pipe so the helper sees EOF
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(IapError::credential_cache(format!(
                "git credential-store {action} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl CredentialCache for GitCredentialStore {
    async fn get(&self, domain: &Domain) -> Result<String> {
        let stdout = self.run("get", &credential_request(domain, None)).await?;
        match parse_credential_output(&stdout).password {
            Some(password) if !password.is_empty() => {
                tracing::debug!(%domain, "Found cached refresh token");
                Ok(password)
            }
            _ => Err(IapError::credential_cache(format!(
                "no cached refresh token for {domain}"
            ))),
        }
    }

    async fn set(&self, domain: &Domain, secret: &str) -> Result<()> {
        self.run("store", &credential_request(domain, Some(secret)))
            .await?;
        tracing::debug!(%domain, "Refresh token saved to credential store");
        Ok(())
    }
}

/// Fields of a credential block we care about
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CredentialFields {
    /// `protocol=`
    pub protocol: Option<String>,
    /// `host=`
    pub host: Option<String>,
    /// `username=`
    pub username: Option<String>,
    /// `password=`
    pub password: Option<String>,
}

/// Build the stdin block for a credential helper call
#[must_use]
pub fn credential_request(domain: &Domain, password: Option<&str>) -> String {
    let mut block = format!(
        "protocol={CACHE_PROTOCOL}\nhost={}\nusername={CACHE_USERNAME}\n",
        domain.host()
    );
    if let Some(password) = password {
        block.push_str("password=");
        block.push_str(password);
        block.push('\n');
    }
    block
}

/// Parse a credential helper's `key=value` output, stopping at a blank line
#[must_use]
pub fn parse_credential_output(output: &str) -> CredentialFields {
    let mut fields = CredentialFields::default();
    for line in output.lines() {
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = Some(value.to_string());
        match key {
            "protocol" => fields.protocol = value,
            "host" => fields.host = value,
            "username" => fields.username = value,
            "password" => fields.password = value,
            _ => {}
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::from_url("https+iap://git.example.com/repo.git").unwrap()
    }

    #[test]
    fn test_credential_request_without_password() {
        assert_eq!(
            credential_request(&domain(), None),
            "protocol=iap\nhost=git.example.com\nusername=refresh-token\n"
        );
    }

    #[test]
    fn test_credential_request_with_password() {
        let block = credential_request(&domain(), Some("1//rt"));
        assert!(block.ends_with("password=1//rt\n"));
    }

    #[test]
    fn test_parse_credential_output() {
        let out = "protocol=iap\nhost=git.example.com\nusername=refresh-token\npassword=1//a=b\n";
        let fields = parse_credential_output(out);
        assert_eq!(fields.protocol.as_deref(), Some("iap"));
        assert_eq!(fields.host.as_deref(), Some("git.example.com"));
        assert_eq!(fields.username.as_deref(), Some("refresh-token"));
        // only the first '=' separates key from value
        assert_eq!(fields.password.as_deref(), Some("1//a=b"));
    }

    #[test]
    fn test_parse_credential_output_empty() {
        assert_eq!(parse_credential_output(""), CredentialFields::default());
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let fields = parse_credential_output("host=a\n\npassword=late\n");
        assert_eq!(fields.host.as_deref(), Some("a"));
        assert!(fields.password.is_none());
    }

    #[tokio::test]
    async fn test_round_trip_through_git_credential_store() {
        let Ok(git) = which::which("git") else {
            eprintln!("git not installed, skipping");
            return;
        };
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store_file = temp_dir.path().join("credentials");
        let store = GitCredentialStore::with_program(git).with_store_file(&store_file);

        let miss = store.get(&domain()).await.unwrap_err();
        assert!(matches!(miss, IapError::CredentialCache(_)));

        store.set(&domain(), "1//rt-value").await.unwrap();
        assert_eq!(store.get(&domain()).await.unwrap(), "1//rt-value");

        let other = Domain::from_url("https+iap://other.example.com/repo.git").unwrap();
        assert!(store.get(&other).await.is_err());

        store.set(&domain(), "1//rt-rotated").await.unwrap();
        assert_eq!(store.get(&domain()).await.unwrap(), "1//rt-rotated");
    }

    #[tokio::test]
    async fn test_missing_binary_is_cache_error() {
        let store = GitCredentialStore::with_program("/nonexistent/git-binary");
        let err = store.get(&domain()).await.unwrap_err();
        assert!(matches!(err, IapError::CredentialCache(_)));
    }
}

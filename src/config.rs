//! Per-domain configuration backed by git config
//!
//! Settings are looked up with `git config --get-urlmatch`, so a single entry
//! such as `iap.https://*.example.com.clientID` can serve many remotes.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::error::{IapError, Result};
use crate::types::{Domain, DomainSettings, OAuthCredentials};

/// Helper OAuth client id
pub const KEY_HELPER_ID: &str = "iap.helperID";
/// Helper OAuth client secret
pub const KEY_HELPER_SECRET: &str = "iap.helperSecret";
/// IAP OAuth client id (token audience)
pub const KEY_CLIENT_ID: &str = "iap.clientID";
/// Cookie jar consumed by git's HTTP transport
pub const KEY_COOKIE_FILE: &str = "http.cookieFile";

/// Custom URL scheme routed to this helper
pub const IAP_SCHEME: &str = "https+iap";

/// Directory, relative to home, holding one cookie jar per domain
const COOKIE_DIR: &str = "~/.config/gcp-iap";

/// Key/value configuration capability
///
/// `get` is URL-pattern matched; `set` writes `<section>.<url>.<key>` into the
/// user's global configuration.
#[async_trait]
pub trait GitConfig: Send + Sync {
    /// Look up `key` for `url`, returning `None` when unset
    ///
    /// # Errors
    /// Returns error if the config backend cannot be queried
    async fn get(&self, key: &str, url: &str) -> Result<Option<String>>;

    /// Store `value` under `<section>.<url>.<key>`
    ///
    /// # Errors
    /// Returns error if the config backend rejects the write
    async fn set(&self, url: &str, section: &str, key: &str, value: &str) -> Result<()>;
}

/// [`GitConfig`] implementation that shells out to `git config`
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Use `git` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git binary
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl GitConfig for GitCli {
    async fn get(&self, key: &str, url: &str) -> Result<Option<String>> {
        let output = Command::new(&self.program)
            .args(["config", "--get-urlmatch", key, url])
            .output()
            .await
            .map_err(|e| IapError::process_exec(format!("git config: {e}")))?;

        // git config exits 1 when the key is simply not set
        if output.status.code() == Some(1) {
            tracing::debug!(key, url, "git config key not set");
            return Ok(None);
        }
        if !output.status.success() {
            return Err(IapError::process_exec(format!(
                "git config --get-urlmatch {key} {url} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    async fn set(&self, url: &str, section: &str, key: &str, value: &str) -> Result<()> {
        let name = format!("{section}.{url}.{key}");
        let output = Command::new(&self.program)
            .args(["config", "--global", &name, value])
            .output()
            .await
            .map_err(|e| IapError::process_exec(format!("git config: {e}")))?;

        if !output.status.success() {
            return Err(IapError::process_exec(format!(
                "git config --global {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::debug!(name, "git config updated");
        Ok(())
    }
}

impl DomainSettings {
    /// Resolve all settings for `domain`
    ///
    /// # Errors
    /// Returns `IapError::ConfigResolution` naming the first unset key.
    pub async fn resolve(config: &dyn GitConfig, domain: &Domain) -> Result<Self> {
        let url = domain.url();
        let client_id = require(config, KEY_HELPER_ID, &url).await?;
        let client_secret = require(config, KEY_HELPER_SECRET, &url).await?;
        let audience = require(config, KEY_CLIENT_ID, &url).await?;
        let cookie_file = require(config, KEY_COOKIE_FILE, &url).await?;

        Ok(Self::builder()
            .credentials(
                OAuthCredentials::builder()
                    .client_id(client_id)
                    .client_secret(client_secret)
                    .audience(audience)
                    .build(),
            )
            .cookie_file(cookie_file)
            .build())
    }
}

async fn require(config: &dyn GitConfig, key: &str, url: &str) -> Result<String> {
    config
        .get(key, url)
        .await?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IapError::config_resolution(key, url))
}

/// Host part of a config URL pattern, wildcards included
fn host_pattern(url: &str) -> Result<&str> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| IapError::invalid_url(format!("'{url}' has no scheme")))?;
    if scheme != "https" {
        return Err(IapError::invalid_url(format!(
            "'{url}' must use https (the helper rewrites it to {IAP_SCHEME})"
        )));
    }
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(IapError::invalid_url(format!("no host in '{url}'")));
    }
    Ok(host)
}

/// Cookie jar path for a URL pattern, e.g. `~/.config/gcp-iap/git_example_com.cookie`
///
/// # Errors
/// Returns `IapError::InvalidUrl` if `url` is not an `https://host` pattern.
pub fn cookie_file_for(url: &str) -> Result<String> {
    let name = host_pattern(url)?
        .replace('.', "_")
        .replace('*', "wildcard")
        .replace(':', "_");
    Ok(format!("{COOKIE_DIR}/{name}.cookie"))
}

/// One-time setup for an IAP-protected URL pattern
///
/// Writes the OAuth settings, the cookie jar location, and an `insteadOf`
/// rule so that `https+iap://` remotes are handled by this helper while git
/// itself keeps talking plain HTTPS. Returns the cookie jar path.
///
/// # Errors
/// Returns error if the URL is not `https://` or any config write fails.
pub async fn configure_domain(
    config: &dyn GitConfig,
    url: &str,
    credentials: &OAuthCredentials,
) -> Result<String> {
    let url = url.trim_end_matches('/');
    let host = host_pattern(url)?;
    let cookie_file = cookie_file_for(url)?;

    config
        .set(url, "iap", "helperID", &credentials.client_id)
        .await?;
    config
        .set(url, "iap", "helperSecret", &credentials.client_secret)
        .await?;
    config
        .set(url, "iap", "clientID", &credentials.audience)
        .await?;
    config.set(url, "http", "cookieFile", &cookie_file).await?;
    config
        .set(&format!("{IAP_SCHEME}://{host}"), "url", "insteadOf", url)
        .await?;

    tracing::info!(url, cookie_file, "IAP helper configured");
    Ok(cookie_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapConfig {
        values: Mutex<HashMap<String, String>>,
    }

    impl MapConfig {
        fn with(pairs: &[(&str, &str)]) -> Self {
            let values = pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            Self {
                values: Mutex::new(values),
            }
        }
    }

    #[async_trait]
    impl GitConfig for MapConfig {
        async fn get(&self, key: &str, _url: &str) -> Result<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, url: &str, section: &str, key: &str, value: &str) -> Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(format!("{section}.{url}.{key}"), value.to_string());
            Ok(())
        }
    }

    fn domain() -> Domain {
        Domain::from_url("https+iap://git.example.com/repo.git").unwrap()
    }

    #[tokio::test]
    async fn test_resolve_all_keys() {
        let config = MapConfig::with(&[
            (KEY_HELPER_ID, "helper-id"),
            (KEY_HELPER_SECRET, "helper-secret"),
            (KEY_CLIENT_ID, "iap-client"),
            (KEY_COOKIE_FILE, "/tmp/jar"),
        ]);

        let settings = DomainSettings::resolve(&config, &domain()).await.unwrap();
        assert_eq!(settings.credentials.client_id, "helper-id");
        assert_eq!(settings.credentials.client_secret, "helper-secret");
        assert_eq!(settings.credentials.audience, "iap-client");
        assert_eq!(settings.cookie_file, "/tmp/jar");
    }

    #[tokio::test]
    async fn test_resolve_missing_key_is_config_error() {
        let config = MapConfig::with(&[
            (KEY_HELPER_ID, "helper-id"),
            (KEY_HELPER_SECRET, "helper-secret"),
            (KEY_COOKIE_FILE, "/tmp/jar"),
        ]);

        let err = DomainSettings::resolve(&config, &domain())
            .await
            .unwrap_err();
        match err {
            IapError::ConfigResolution { key, domain } => {
                assert_eq!(key, KEY_CLIENT_ID);
                assert_eq!(domain, "https://git.example.com");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_empty_value_counts_as_missing() {
        let config = MapConfig::with(&[
            (KEY_HELPER_ID, ""),
            (KEY_HELPER_SECRET, "s"),
            (KEY_CLIENT_ID, "c"),
            (KEY_COOKIE_FILE, "/tmp/jar"),
        ]);
        let err = DomainSettings::resolve(&config, &domain())
            .await
            .unwrap_err();
        assert!(matches!(err, IapError::ConfigResolution { ref key, .. } if key == KEY_HELPER_ID));
    }

    #[test]
    fn test_cookie_file_for() {
        assert_eq!(
            cookie_file_for("https://git.example.com").unwrap(),
            "~/.config/gcp-iap/git_example_com.cookie"
        );
        assert_eq!(
            cookie_file_for("https://*.corp.example.com/").unwrap(),
            "~/.config/gcp-iap/wildcard_corp_example_com.cookie"
        );
        assert!(cookie_file_for("http://git.example.com").is_err());
        assert!(cookie_file_for("git.example.com").is_err());
    }

    #[tokio::test]
    async fn test_configure_domain_writes_all_keys() {
        let config = MapConfig::default();
        let creds = OAuthCredentials::builder()
            .client_id("helper-id")
            .client_secret("helper-secret")
            .audience("iap-client")
            .build();

        let jar = configure_domain(&config, "https://git.example.com/", &creds)
            .await
            .unwrap();
        assert_eq!(jar, "~/.config/gcp-iap/git_example_com.cookie");

        let values = config.values.lock().unwrap();
        let url = "https://git.example.com";
        assert_eq!(values[&format!("iap.{url}.helperID")], "helper-id");
        assert_eq!(values[&format!("iap.{url}.helperSecret")], "helper-secret");
        assert_eq!(values[&format!("iap.{url}.clientID")], "iap-client");
        assert_eq!(values[&format!("http.{url}.cookieFile")], jar);
        assert_eq!(
            values["url.https+iap://git.example.com.insteadOf"],
            "https://git.example.com"
        );
    }
}

//! Newtype wrappers for type safety

use std::borrow::Borrow;
use url::Url;

use crate::error::{IapError, Result};

/// Authentication scope: the host (and port) of a remote, without path.
///
/// Every cookie, cached refresh token and config lookup is keyed by a
/// `Domain`. The custom `https+iap` scheme and plain `https` both map to the
/// same domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Domain(String);

impl Domain {
    /// Derive the domain from a remote URL such as `https+iap://host/repo.git`
    ///
    /// # Errors
    /// Returns `IapError::InvalidUrl` if the URL has no host.
    pub fn from_url(remote_url: &str) -> Result<Self> {
        let url = Url::parse(remote_url)?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IapError::invalid_url(format!("no host in '{remote_url}'")))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self(authority.to_ascii_lowercase()))
    }

    /// Host with optional `:port`, as written into the cookie jar
    #[must_use]
    pub fn host(&self) -> &str {
        &self.0
    }

    /// `https://host[:port]`, the form used for `git config --get-urlmatch`
    #[must_use]
    pub fn url(&self) -> String {
        format!("https://{}", self.0)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Domain {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Domain {
    type Err = IapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_url(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_from_custom_scheme() {
        let domain = Domain::from_url("https+iap://git.example.com/team/repo.git").unwrap();
        assert_eq!(domain.host(), "git.example.com");
        assert_eq!(domain.url(), "https://git.example.com");
    }

    #[test]
    fn test_domain_from_https_keeps_port() {
        let domain = Domain::from_url("https://Git.Example.com:8443/repo").unwrap();
        assert_eq!(domain.host(), "git.example.com:8443");
        assert_eq!(domain.url(), "https://git.example.com:8443");
    }

    #[test]
    fn test_same_domain_for_both_schemes() {
        let a = Domain::from_url("https+iap://git.example.com/a").unwrap();
        let b: Domain = "https://git.example.com/b".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_domain_rejects_hostless_url() {
        assert!(Domain::from_url("file:///tmp/repo").is_err());
        assert!(Domain::from_url("not a url").is_err());
    }
}

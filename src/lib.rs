//! # git-remote-iap
//!
//! Git remote helper for HTTPS remotes behind Google Cloud Identity-Aware
//! Proxy (IAP).
//!
//! Git runs `git-remote-https+iap <remote> <url>` for `https+iap://` URLs.
//! The helper makes sure a valid IAP identity token sits in the remote's
//! cookie jar, then hands the connection to `git remote-https` with the
//! token attached as `Proxy-Authorization: Bearer <token>`. Everything after
//! that is ordinary smart-HTTP.
//!
//! ## Quick Start
//!
//! ```no_run
//! use git_remote_iap::{Domain, DomainSettings, GitCli, OAuthFlow, Passthrough, TokenLifecycle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let url = "https+iap://git.example.com/team/repo.git";
//!     let domain = Domain::from_url(url)?;
//!     let settings = DomainSettings::resolve(&GitCli::new(), &domain).await?;
//!
//!     let cookie = TokenLifecycle::new(OAuthFlow::new())
//!         .ensure_token(&domain, &settings)
//!         .await?;
//!
//!     let code = Passthrough::new()?.run("origin", url, &cookie.token).await?;
//!     std::process::exit(code);
//! }
//! ```
//!
//! ## Components
//!
//! - [`config`]: per-domain settings from `git config --get-urlmatch`
//! - [`credential`]: refresh-token cache over `git credential-store`
//! - [`auth`]: cookie jar, OAuth browser flow, token lifecycle
//! - [`transport`]: hand-off to `git remote-https`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use auth::{
    BrowserLauncher, Cookie, CookieJar, IAP_COOKIE_NAME, IdentityToken, OAuthEndpoints, OAuthFlow,
    OAuthFlowBuilder, SystemBrowser, TokenLifecycle, TokenState,
};
pub use config::{GitCli, GitConfig, configure_domain};
pub use credential::{CredentialCache, GitCredentialStore};
pub use error::{IapError, Result};
pub use transport::{MIN_GIT_VERSION, Passthrough, check_git_version};
pub use types::{Domain, DomainSettings, OAuthCredentials};

/// Version of the helper
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name git looks up for the `https+iap` scheme
pub const HELPER_NAME: &str = "git-remote-https+iap";

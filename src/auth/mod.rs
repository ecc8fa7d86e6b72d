//! IAP authentication
//!
//! Keeps a valid IAP identity token in the cookie jar git reads.
//!
//! # Overview
//!
//! 1. Read the jar; reuse the token while `now < exp`
//! 2. Otherwise take the refresh token from the credential cache, or run the
//!    browser flow (authorization code + PKCE via a loopback redirect)
//! 3. Exchange the refresh token for an identity token with the IAP client
//!    id as audience
//! 4. Overwrite the jar with the new token
//!
//! # Example
//!
//! ```no_run
//! use git_remote_iap::auth::{OAuthFlow, TokenLifecycle};
//! use git_remote_iap::config::GitCli;
//! use git_remote_iap::types::{Domain, DomainSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let domain = Domain::from_url("https+iap://git.example.com/repo.git")?;
//!     let settings = DomainSettings::resolve(&GitCli::new(), &domain).await?;
//!
//!     let lifecycle = TokenLifecycle::new(OAuthFlow::new());
//!     let cookie = lifecycle.ensure_token(&domain, &settings).await?;
//!     println!("token valid until {}", cookie.claims.expires_at);
//!     Ok(())
//! }
//! ```
//!
//! # Security
//!
//! - The identity token's signature is not verified locally; only `exp` is
//!   read, and IAP remains the party that authorizes requests
//! - The jar is written with user-only permissions (600)
//! - Refresh tokens live in git's credential store, never in the jar

pub mod browser;
pub mod callback;
pub mod cookie;
pub mod lifecycle;
pub mod oauth;
pub mod token;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use callback::CallbackListener;
pub use cookie::{Cookie, CookieClaims, CookieJar, IAP_COOKIE_NAME};
pub use lifecycle::{TokenLifecycle, TokenState};
pub use oauth::{OAuthEndpoints, OAuthFlow, OAuthFlowBuilder, RefreshSource};
pub use token::{IdentityClaims, IdentityToken};

//! Deciding whether the jar's token can be reused

use super::cookie::{Cookie, CookieJar};
use super::oauth::OAuthFlow;
use crate::error::Result;
use crate::types::{Domain, DomainSettings};
use crate::utils::now_unix;

/// State of the jar at the start of an invocation
#[derive(Debug)]
pub enum TokenState {
    /// Jar missing, unreadable or without an IAP line
    Missing,
    /// Cookie found but `expires_at <= now`
    Expired(Cookie),
    /// Cookie usable as-is
    Valid(Cookie),
}

impl TokenState {
    /// Classify a jar read as of `now`
    #[must_use]
    pub fn classify(read: Result<Cookie>, now: i64) -> Self {
        match read {
            Ok(cookie) if cookie.is_expired_at(now) => Self::Expired(cookie),
            Ok(cookie) => Self::Valid(cookie),
            Err(e) => {
                if !e.is_cookie_miss() {
                    tracing::warn!("Could not read cookie jar, re-authenticating: {e}");
                }
                Self::Missing
            }
        }
    }

    /// Short label for logs and status output
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired(_) => "expired",
            Self::Valid(_) => "valid",
        }
    }
}

/// Produces a usable IAP cookie for a domain, once per invocation
#[derive(Debug)]
pub struct TokenLifecycle {
    flow: OAuthFlow,
    force_reconsent: bool,
}

impl TokenLifecycle {
    /// Lifecycle driven by `flow`
    #[must_use]
    pub fn new(flow: OAuthFlow) -> Self {
        Self {
            flow,
            force_reconsent: false,
        }
    }

    /// Ignore both the jar and the cached refresh token and ask the user again
    #[must_use]
    pub fn force_reconsent(mut self, force: bool) -> Self {
        self.force_reconsent = force;
        self
    }

    /// Read and classify the jar without touching the network
    #[must_use]
    pub fn inspect(&self, domain: &Domain, settings: &DomainSettings) -> TokenState {
        let jar = CookieJar::from_config(&settings.cookie_file);
        TokenState::classify(jar.read(domain), now_unix())
    }

    /// Return a valid cookie, refreshing it when missing or expired
    ///
    /// # Errors
    ///
    /// Returns error if a refresh is needed and the OAuth flow or the jar
    /// write fails.
    pub async fn ensure_token(&self, domain: &Domain, settings: &DomainSettings) -> Result<Cookie> {
        let state = self.inspect(domain, settings);
        tracing::debug!(%domain, state = state.label(), "Cookie jar checked");

        match state {
            TokenState::Valid(cookie) if !self.force_reconsent => Ok(cookie),
            _ => self.refresh(domain, settings).await,
        }
    }

    /// Fetch a new identity token and replace the jar contents with it
    ///
    /// # Errors
    ///
    /// Returns error if the OAuth flow or the jar write fails; the jar is not
    /// touched when the flow fails.
    pub async fn refresh(&self, domain: &Domain, settings: &DomainSettings) -> Result<Cookie> {
        let identity = self
            .flow
            .acquire_identity_token(domain, &settings.credentials, self.force_reconsent)
            .await?;

        let jar = CookieJar::from_config(&settings.cookie_file);
        let cookie = jar.write(domain, &identity.raw, identity.claims.exp)?;
        tracing::info!(
            %domain,
            expires_at = cookie.claims.expires_at,
            email = identity.claims.email.as_deref().unwrap_or("unknown"),
            "IAP token refreshed"
        );
        Ok(cookie)
    }
}

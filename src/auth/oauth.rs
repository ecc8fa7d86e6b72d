//! OAuth 2.0 flow that yields an IAP identity token
//!
//! Two phases:
//!
//! 1. Obtain a refresh token for the helper client, from the credential
//!    cache or through the browser (authorization code + PKCE, redirected to
//!    a loopback listener).
//! 2. Exchange the refresh token for an identity token whose audience is the
//!    IAP client id.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::browser::{BrowserLauncher, SystemBrowser};
use super::callback::{CallbackListener, DEFAULT_CALLBACK_TIMEOUT};
use super::token::IdentityToken;
use crate::credential::{CredentialCache, GitCredentialStore};
use crate::error::{IapError, Result};
use crate::types::{Domain, OAuthCredentials};
use crate::utils::{redact, safe_truncate};

// Google OAuth endpoints used by IAP
const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_SCOPES: &str = "openid email";

/// Provider endpoints
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    /// Authorization endpoint URL
    pub auth_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Space-separated scopes to request
    pub scopes: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
        }
    }
}

/// Response from token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    #[allow(dead_code)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Error response from token endpoint
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Where the refresh token used for an exchange came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    /// Credential cache hit
    Cache,
    /// Freshly obtained through the browser
    Browser,
}

/// PKCE code challenge data
#[derive(Debug, Clone)]
struct PkceChallenge {
    /// Code verifier (random string)
    verifier: String,
    /// Code challenge (SHA-256 hash of verifier, base64url encoded)
    challenge: String,
}

impl PkceChallenge {
    fn generate() -> Self {
        // 32 bytes base64url encode to a 43-char verifier
        let verifier = URL_SAFE_NO_PAD.encode(random_bytes());

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

/// 32 bytes hashed from OS-seeded hasher keys, the clock and the pid
fn random_bytes() -> [u8; 32] {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut hasher = Sha256::new();
    for _ in 0..4 {
        let mut seeded = RandomState::new().build_hasher();
        seeded.write_u128(timestamp);
        hasher.update(seeded.finish().to_le_bytes());
    }
    hasher.update(timestamp.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    bytes
}

/// Random `state` parameter (base64url, 32 chars)
fn generate_state() -> String {
    URL_SAFE_NO_PAD.encode(&random_bytes()[..24])
}

/// Result of the interactive authorization
struct Authorization {
    code: String,
    redirect_uri: String,
    verifier: String,
}

/// Builder for [`OAuthFlow`]
#[derive(Default)]
pub struct OAuthFlowBuilder {
    endpoints: Option<OAuthEndpoints>,
    cache: Option<Arc<dyn CredentialCache>>,
    browser: Option<Arc<dyn BrowserLauncher>>,
    callback_timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
}

impl OAuthFlowBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom provider endpoints
    #[must_use]
    pub fn endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Set the refresh-token cache
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set how the authorization URL is opened
    #[must_use]
    pub fn browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Set how long to wait for the browser redirect (default: 5 minutes)
    #[must_use]
    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    /// Set the HTTP client used for the token endpoint
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the OAuth flow
    #[must_use]
    pub fn build(self) -> OAuthFlow {
        OAuthFlow {
            endpoints: self.endpoints.unwrap_or_default(),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(GitCredentialStore::new())),
            browser: self.browser.unwrap_or_else(|| Arc::new(SystemBrowser)),
            callback_timeout: self.callback_timeout.unwrap_or(DEFAULT_CALLBACK_TIMEOUT),
            http_client: self.http_client.unwrap_or_default(),
        }
    }
}

/// OAuth flow producing IAP identity tokens
pub struct OAuthFlow {
    endpoints: OAuthEndpoints,
    cache: Arc<dyn CredentialCache>,
    browser: Arc<dyn BrowserLauncher>,
    callback_timeout: Duration,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("endpoints", &self.endpoints)
            .field("callback_timeout", &self.callback_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for OAuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthFlow {
    /// Google endpoints, git credential store, system browser
    #[must_use]
    pub fn new() -> Self {
        OAuthFlowBuilder::new().build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder() -> OAuthFlowBuilder {
        OAuthFlowBuilder::new()
    }

    /// Get the provider endpoints
    #[must_use]
    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// Obtain a fresh identity token for `domain`
    ///
    /// Uses the cached refresh token unless `force_reconsent` is set. If the
    /// provider rejects a cached refresh token with `invalid_grant`, the
    /// browser flow runs once and the exchange is retried.
    ///
    /// # Errors
    ///
    /// Returns `IapError::BrowserFlow` if interactive authorization fails,
    /// `IapError::TokenExchange` if the token endpoint refuses, or
    /// `IapError::InvalidToken` if the identity token cannot be decoded.
    pub async fn acquire_identity_token(
        &self,
        domain: &Domain,
        credentials: &OAuthCredentials,
        force_reconsent: bool,
    ) -> Result<IdentityToken> {
        let (refresh_token, source) = self
            .acquire_refresh_token(domain, credentials, force_reconsent)
            .await?;

        match self.exchange_refresh_token(credentials, &refresh_token).await {
            Err(e) if source == RefreshSource::Cache && e.is_invalid_grant() => {
                tracing::warn!(%domain, "Cached refresh token was rejected ({e}); re-authorizing");
                let refresh_token = self.browser_flow(domain, credentials).await?;
                self.exchange_refresh_token(credentials, &refresh_token)
                    .await
            }
            result => result,
        }
    }

    /// Refresh token from cache, or from the browser on a miss
    ///
    /// # Errors
    ///
    /// Returns error if the browser flow is needed and fails.
    pub async fn acquire_refresh_token(
        &self,
        domain: &Domain,
        credentials: &OAuthCredentials,
        force_reconsent: bool,
    ) -> Result<(String, RefreshSource)> {
        if force_reconsent {
            tracing::debug!(%domain, "Forcing browser authorization");
        } else {
            match self.cache.get(domain).await {
                Ok(token) => {
                    tracing::debug!(%domain, token = %redact(&token), "Using cached refresh token");
                    return Ok((token, RefreshSource::Cache));
                }
                Err(e) => tracing::debug!(%domain, "No cached refresh token: {e}"),
            }
        }

        let token = self.browser_flow(domain, credentials).await?;
        Ok((token, RefreshSource::Browser))
    }

    /// Run the interactive authorization and cache the resulting refresh token
    ///
    /// A cache write failure is logged and does not fail the call.
    ///
    /// # Errors
    ///
    /// Returns error if authorization or the code exchange fails.
    pub async fn browser_flow(
        &self,
        domain: &Domain,
        credentials: &OAuthCredentials,
    ) -> Result<String> {
        let authorization = self.authorize_interactively(credentials).await?;
        let refresh_token = self.exchange_code(credentials, &authorization).await?;

        if let Err(e) = self.cache.set(domain, &refresh_token).await {
            tracing::warn!(%domain, "Could not cache refresh token: {e}");
        }
        Ok(refresh_token)
    }

    /// Open the browser and wait for the redirect, concurrently.
    ///
    /// The two halves share a cancellation token: the first to fail cancels
    /// the other, and the listener is dropped (closing its port) on return.
    async fn authorize_interactively(
        &self,
        credentials: &OAuthCredentials,
    ) -> Result<Authorization> {
        let pkce = PkceChallenge::generate();
        let state = generate_state();
        let listener = CallbackListener::bind().await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let auth_url = self.build_auth_url(credentials, &redirect_uri, &pkce.challenge, &state)?;

        let cancel = CancellationToken::new();
        let _cancel_on_return = cancel.clone().drop_guard();
        let (ready_tx, ready_rx) = oneshot::channel::<String>();

        let cancel_ref = &cancel;
        let state_ref = state.as_str();
        let timeout = self.callback_timeout;
        let browser = Arc::clone(&self.browser);

        let open_browser = async move {
            let url = tokio::select! {
                () = cancel_ref.cancelled() => return Err(IapError::Cancelled),
                ready = ready_rx => match ready {
                    Ok(url) => url,
                    // listener side ended before it was ready
                    Err(_) => return Ok(()),
                },
            };
            eprintln!("Opening browser to authorize access to the IAP-protected remote...");
            eprintln!("If it does not open, visit:\n  {url}");
            if let Err(e) = browser.open(&url).await {
                tracing::warn!("Could not open browser: {e}");
                eprintln!("(Could not open browser automatically - please open the URL manually)");
            }
            Ok(())
        };

        let receive_code = async move {
            // The listener is bound, so the browser may be pointed at it now
            let _ = ready_tx.send(auth_url);
            listener.wait_for_code(state_ref, cancel_ref, timeout).await
        };

        let ((), code) = tokio::try_join!(
            cancel_on_error(cancel_ref, open_browser),
            cancel_on_error(cancel_ref, receive_code),
        )
        .map_err(|e| match e {
            IapError::Io(io) => IapError::browser_flow(format!("callback listener: {io}")),
            other => other,
        })?;

        tracing::debug!(code = %redact(&code), "Received authorization code");
        Ok(Authorization {
            code,
            redirect_uri,
            verifier: pkce.verifier,
        })
    }

    /// Build the authorization URL with PKCE challenge
    fn build_auth_url(
        &self,
        credentials: &OAuthCredentials,
        redirect_uri: &str,
        code_challenge: &str,
        state: &str,
    ) -> Result<String> {
        let url = Url::parse_with_params(
            &self.endpoints.auth_url,
            [
                ("client_id", credentials.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", self.endpoints.scopes.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
            ],
        )?;
        Ok(url.into())
    }

    /// Exchange the authorization code for a refresh token
    async fn exchange_code(
        &self,
        credentials: &OAuthCredentials,
        authorization: &Authorization,
    ) -> Result<String> {
        let response = self
            .post_token_form(&[
                ("grant_type", "authorization_code"),
                ("code", authorization.code.as_str()),
                ("redirect_uri", authorization.redirect_uri.as_str()),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("code_verifier", authorization.verifier.as_str()),
            ])
            .await?;

        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                IapError::invalid_response("authorization code exchange returned no refresh_token")
            })?;
        tracing::debug!(
            scope = response.scope.as_deref().unwrap_or_default(),
            "Obtained refresh token from authorization code"
        );
        Ok(refresh_token)
    }

    /// Exchange a refresh token for an identity token minted for the IAP audience
    ///
    /// # Errors
    ///
    /// Returns `IapError::TokenExchange` carrying the provider's `error` and
    /// `error_description` on a non-success status, or
    /// `IapError::InvalidResponse` / `IapError::InvalidToken` if the reply
    /// lacks a usable `id_token`.
    pub async fn exchange_refresh_token(
        &self,
        credentials: &OAuthCredentials,
        refresh_token: &str,
    ) -> Result<IdentityToken> {
        let response = self
            .post_token_form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
                ("audience", credentials.audience.as_str()),
            ])
            .await?;

        let id_token = response
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IapError::invalid_response("token response has no id_token"))?;
        tracing::debug!(
            expires_in = response.expires_in,
            "Exchanged refresh token for IAP identity token"
        );

        IdentityToken::parse_unverified(&id_token)
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let error = serde_json::from_str::<ErrorResponse>(&body).unwrap_or_else(|_| {
                ErrorResponse {
                    error: format!("http_{}", status.as_u16()),
                    error_description: Some(safe_truncate(body.trim(), 200).to_string()),
                }
            });
            return Err(IapError::token_exchange(
                error.error,
                error.error_description.unwrap_or_default(),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            IapError::invalid_response(format!("failed to parse token response: {e}"))
        })
    }
}

/// Cancel `cancel` if `fut` fails, so the sibling task stops too
async fn cancel_on_error<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let result = fut.await;
    if result.is_err() {
        cancel.cancel();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> OAuthCredentials {
        OAuthCredentials::builder()
            .client_id("helper.apps.googleusercontent.com")
            .client_secret("helper-secret")
            .audience("iap.apps.googleusercontent.com")
            .build()
    }

    #[test]
    fn test_pkce_challenge_generation() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge.len(), 43);
        assert!(
            pkce.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let pkce = PkceChallenge::generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn test_state_values_differ() {
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 32);
    }

    #[test]
    fn test_endpoints_default() {
        let endpoints = OAuthEndpoints::default();
        assert_eq!(endpoints.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(endpoints.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(endpoints.scopes, "openid email");
    }

    #[test]
    fn test_build_auth_url() {
        let flow = OAuthFlow::builder().build();
        let url = flow
            .build_auth_url(&credentials(), "http://127.0.0.1:4242/", "chal", "st")
            .unwrap();
        let url = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with(DEFAULT_AUTH_URL));
        assert_eq!(params["client_id"], "helper.apps.googleusercontent.com");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:4242/");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "openid email");
        assert_eq!(params["state"], "st");
        assert_eq!(params["code_challenge"], "chal");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["access_type"], "offline");
    }

    #[tokio::test]
    async fn test_cancel_on_error_cancels() {
        let cancel = CancellationToken::new();
        let result: Result<()> =
            cancel_on_error(&cancel, async { Err(IapError::browser_flow("boom")) }).await;
        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_on_success_leaves_token() {
        let cancel = CancellationToken::new();
        let value = cancel_on_error(&cancel, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!cancel.is_cancelled());
    }
}

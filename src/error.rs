//! Error types for the IAP remote helper

use thiserror::Error;

/// Main error type for the IAP remote helper
#[derive(Error, Debug)]
pub enum IapError {
    /// A required per-domain setting is missing from git config
    #[error(
        "missing git config '{key}' for {domain}. Run: git-remote-iap configure --url {domain} ..."
    )]
    ConfigResolution {
        /// Config key that resolved to nothing
        key: String,
        /// Domain the lookup was scoped to
        domain: String,
    },

    /// No usable IAP cookie in the jar
    #[error("IAP cookie not found: {0}")]
    CookieNotFound(String),

    /// IAP cookie is present but past its expiry
    #[error("IAP cookie has expired")]
    CookieExpired,

    /// A cookie-jar line could not be understood
    #[error("Malformed cookie-jar line ({reason}): {line}")]
    CookieParse {
        /// Offending line, redacted
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// The interactive browser flow failed
    #[error("Browser authorization failed: {0}")]
    BrowserFlow(String),

    /// Token endpoint returned a non-success status
    #[error("Token exchange failed: {error}: {description}")]
    TokenExchange {
        /// OAuth error code (e.g. `invalid_grant`)
        error: String,
        /// Human-readable description from the provider
        description: String,
    },

    /// Token endpoint returned something we could not use
    #[error("Invalid response from token endpoint: {0}")]
    InvalidResponse(String),

    /// Identity token could not be decoded
    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    /// Credential helper failed
    #[error("Credential cache error: {0}")]
    CredentialCache(String),

    /// The underlying transport could not be located or started
    #[error("Could not run git transport: {0}")]
    ProcessExec(String),

    /// URL could not be parsed or rewritten
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for IAP helper operations
pub type Result<T> = std::result::Result<T, IapError>;

impl IapError {
    /// Create a config resolution error
    pub fn config_resolution(key: impl Into<String>, domain: impl Into<String>) -> Self {
        Self::ConfigResolution {
            key: key.into(),
            domain: domain.into(),
        }
    }

    /// Create a cookie not found error
    pub fn cookie_not_found(msg: impl Into<String>) -> Self {
        Self::CookieNotFound(msg.into())
    }

    /// Create a cookie parse error
    pub fn cookie_parse(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CookieParse {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create a browser flow error
    pub fn browser_flow(msg: impl Into<String>) -> Self {
        Self::BrowserFlow(msg.into())
    }

    /// Create a token exchange error
    pub fn token_exchange(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::TokenExchange {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an invalid token error
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    /// Create a credential cache error
    pub fn credential_cache(msg: impl Into<String>) -> Self {
        Self::CredentialCache(msg.into())
    }

    /// Create a process exec error
    pub fn process_exec(msg: impl Into<String>) -> Self {
        Self::ProcessExec(msg.into())
    }

    /// Create an invalid URL error
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }

    /// True when the provider rejected a refresh token as stale or revoked
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::TokenExchange { error, .. } if error == "invalid_grant")
    }

    /// True for the cookie states that just mean "go get a new token"
    #[must_use]
    pub fn is_cookie_miss(&self) -> bool {
        matches!(self, Self::CookieNotFound(_) | Self::CookieExpired)
    }
}

impl From<url::ParseError> for IapError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_exchange_message_has_code_and_description() {
        let err = IapError::token_exchange("invalid_grant", "Token has been expired or revoked.");
        let msg = err.to_string();
        assert!(msg.contains("invalid_grant"));
        assert!(msg.contains("Token has been expired or revoked."));
        assert!(err.is_invalid_grant());
    }

    #[test]
    fn test_other_exchange_errors_are_not_invalid_grant() {
        let err = IapError::token_exchange("invalid_client", "Unauthorized");
        assert!(!err.is_invalid_grant());
        assert!(!IapError::Cancelled.is_invalid_grant());
    }

    #[test]
    fn test_cookie_miss() {
        assert!(IapError::CookieExpired.is_cookie_miss());
        assert!(IapError::cookie_not_found("x").is_cookie_miss());
        assert!(!IapError::browser_flow("x").is_cookie_miss());
    }

    #[test]
    fn test_config_resolution_names_key_and_domain() {
        let err = IapError::config_resolution("iap.clientID", "https://git.example.com");
        let msg = err.to_string();
        assert!(msg.contains("iap.clientID"));
        assert!(msg.contains("https://git.example.com"));
    }
}

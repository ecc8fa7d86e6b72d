//! Identity token returned by the token endpoint
//!
//! The token is a signed JWT minted for the IAP audience. Its signature is
//! not checked here: IAP verifies it on every request, and the helper only
//! reads `exp` to decide when to fetch a new one.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::error::{IapError, Result};

/// Claims read from the identity token payload
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IdentityClaims {
    /// Expiry as Unix seconds
    pub exp: i64,

    /// Issue time as Unix seconds
    #[serde(default)]
    pub iat: Option<i64>,

    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,

    /// Authenticated principal's email, when the `email` scope was granted
    #[serde(default)]
    pub email: Option<String>,
}

/// A raw identity token with its decoded (unverified) claims
#[derive(Debug, Clone)]
pub struct IdentityToken {
    /// Compact-serialized token, as sent to IAP
    pub raw: String,
    /// Decoded payload
    pub claims: IdentityClaims,
}

impl IdentityToken {
    /// Decode the payload of a compact JWT without verifying its signature
    ///
    /// # Errors
    ///
    /// Returns `IapError::InvalidToken` if the token does not have three
    /// segments, the payload is not base64url JSON, or `exp` is missing.
    pub fn parse_unverified(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut parts = raw.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IapError::invalid_token("expected three dot-separated segments"));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| IapError::invalid_token(format!("payload is not base64url: {e}")))?;
        let claims: IdentityClaims = serde_json::from_slice(&bytes)
            .map_err(|e| IapError::invalid_token(format!("payload claims: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            claims,
        })
    }
}

#[cfg(test)]
pub(crate) fn fake_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

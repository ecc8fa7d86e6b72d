//! Per-domain settings resolved once per invocation

use std::path::PathBuf;
use typed_builder::TypedBuilder;

use crate::utils::expand_home;

/// OAuth credentials for one IAP-protected domain.
///
/// `client_id`/`client_secret` identify the desktop "helper" OAuth client the
/// user consents to; `audience` is the IAP OAuth client id the identity token
/// must be minted for.
#[derive(Clone, TypedBuilder)]
pub struct OAuthCredentials {
    /// Helper OAuth client id (`iap.helperID`)
    #[builder(setter(into))]
    pub client_id: String,

    /// Helper OAuth client secret (`iap.helperSecret`)
    #[builder(setter(into))]
    pub client_secret: String,

    /// IAP OAuth client id used as token audience (`iap.clientID`)
    #[builder(setter(into))]
    pub audience: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("audience", &self.audience)
            .finish()
    }
}

/// Everything the token lifecycle needs to know about one domain
#[derive(Debug, Clone, TypedBuilder)]
pub struct DomainSettings {
    /// OAuth client configuration
    pub credentials: OAuthCredentials,

    /// Cookie jar path as configured (`http.cookieFile`), may start with `~`
    #[builder(setter(into))]
    pub cookie_file: String,
}

impl DomainSettings {
    /// Cookie jar path with `~` expanded
    #[must_use]
    pub fn jar_path(&self) -> PathBuf {
        expand_home(&self.cookie_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secret() {
        let creds = OAuthCredentials::builder()
            .client_id("helper.apps.googleusercontent.com")
            .client_secret("GOCSPX-very-secret")
            .audience("iap.apps.googleusercontent.com")
            .build();
        let debug = format!("{creds:?}");
        assert!(debug.contains("helper.apps.googleusercontent.com"));
        assert!(!debug.contains("GOCSPX-very-secret"));
    }

    #[test]
    fn test_jar_path_absolute() {
        let settings = DomainSettings::builder()
            .credentials(
                OAuthCredentials::builder()
                    .client_id("id")
                    .client_secret("secret")
                    .audience("aud")
                    .build(),
            )
            .cookie_file("/tmp/iap/git_example_com.cookie")
            .build();
        assert_eq!(
            settings.jar_path(),
            PathBuf::from("/tmp/iap/git_example_com.cookie")
        );
    }
}

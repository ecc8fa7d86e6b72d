//! IAP cookie persisted in a Netscape-format cookie jar
//!
//! Git's HTTP transport reads the same file through `http.cookieFile`, so the
//! layout follows curl's text format: seven tab-separated fields per line.
//!
//! ```text
//! domain \t flag \t path \t secure \t expiresAt \t name \t value
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::token::IdentityToken;
use crate::error::{IapError, Result};
use crate::types::Domain;
use crate::utils::{expand_home, now_unix, redact};

/// Name of the cookie IAP expects the identity token in
pub const IAP_COOKIE_NAME: &str = "GCP_IAAP_AUTH_TOKEN";

/// Placeholder written for the flag, path and secure fields
const PLACEHOLDER: &str = "x";

const FIELD_COUNT: usize = 7;

/// Claims kept alongside the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieClaims {
    /// Unix timestamp after which the token is no longer accepted
    pub expires_at: i64,
}

/// The current proxy-auth token for one domain
#[derive(Debug, Clone)]
pub struct Cookie {
    /// Jar the cookie was read from or written to
    pub jar_path: PathBuf,
    /// Domain the token is scoped to
    pub domain: Domain,
    /// Raw signed identity token
    pub token: String,
    /// Expiry bookkeeping
    pub claims: CookieClaims,
}

impl Cookie {
    /// Expired as of `now` (Unix seconds). Valid only while `now < expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.claims.expires_at <= now
    }

    /// Expired as of the current wall clock
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_unix())
    }

    /// Remaining lifetime, if any
    #[must_use]
    pub fn remaining_validity(&self) -> Option<Duration> {
        let left = self.claims.expires_at - now_unix();
        u64::try_from(left)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Value for the `Proxy-Authorization` header
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Cookie jar holding a single IAP token
#[derive(Debug, Clone)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    /// Jar at an already-expanded path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Jar at a configured path, expanding a leading `~`
    #[must_use]
    pub fn from_config(cookie_file: &str) -> Self {
        Self::new(expand_home(cookie_file))
    }

    /// Get the jar path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the IAP cookie for `domain`
    ///
    /// Blank lines and `#` comments are ignored. Lines that are not UTF-8,
    /// have the wrong field count or an unparseable expiry, or whose value
    /// does not decode as an identity token are skipped with a log entry.
    /// Cookies with another name are skipped quietly. The first good line
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns `IapError::CookieNotFound` if the file does not exist or holds
    /// no usable IAP line, or an I/O error if it cannot be read.
    pub fn read(&self, domain: &Domain) -> Result<Cookie> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IapError::cookie_not_found(format!(
                    "{} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        for raw in BufReader::new(file).split(b'\n') {
            let raw = raw?;
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    let e = IapError::cookie_parse("<binary>", format!("not UTF-8: {e}"));
                    tracing::warn!(path = %self.path.display(), "Skipping cookie line: {e}");
                    continue;
                }
            };
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Ok(Some((token, expires_at))) => {
                    return Ok(Cookie {
                        jar_path: self.path.clone(),
                        domain: domain.clone(),
                        token,
                        claims: CookieClaims { expires_at },
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %self.path.display(), "Skipping cookie line: {e}"),
            }
        }

        Err(IapError::cookie_not_found(format!(
            "no {IAP_COOKIE_NAME} entry in {}",
            self.path.display()
        )))
    }

    /// Read the cookie, failing with `IapError::CookieExpired` if it is stale
    ///
    /// # Errors
    ///
    /// Same as [`CookieJar::read`], plus `IapError::CookieExpired`.
    pub fn read_valid(&self, domain: &Domain) -> Result<Cookie> {
        let cookie = self.read(domain)?;
        if cookie.is_expired() {
            Err(IapError::CookieExpired)
        } else {
            Ok(cookie)
        }
    }

    /// Replace the jar contents with a single IAP cookie line
    ///
    /// The parent directory is created owner-only and the file is truncated
    /// and restricted to `0600` before the token is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created or written.
    pub fn write(&self, domain: &Domain, token: &str, expires_at: i64) -> Result<Cookie> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        // mode() only applies on creation; tighten an existing file too
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        writeln!(
            file,
            "{}\t{PLACEHOLDER}\t{PLACEHOLDER}\t{PLACEHOLDER}\t{expires_at}\t{IAP_COOKIE_NAME}\t{token}",
            domain.host()
        )?;
        file.flush()?;

        tracing::debug!(
            path = %self.path.display(),
            %domain,
            expires_at,
            token = %redact(token),
            "IAP cookie written"
        );

        Ok(Cookie {
            jar_path: self.path.clone(),
            domain: domain.clone(),
            token: token.to_string(),
            claims: CookieClaims { expires_at },
        })
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

/// Parse one non-comment jar line.
///
/// `Ok(None)` means a well-formed cookie that is not ours.
fn parse_line(line: &str) -> Result<Option<(String, i64)>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != FIELD_COUNT {
        return Err(IapError::cookie_parse(
            redact(line),
            format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
        ));
    }

    let name = fields[5];
    if name != IAP_COOKIE_NAME {
        tracing::debug!(name, "Skipping unrelated cookie");
        return Ok(None);
    }

    let expires_at = fields[4].trim().parse::<i64>().map_err(|e| {
        IapError::cookie_parse(redact(line), format!("bad expiry '{}': {e}", fields[4]))
    })?;

    let token = fields[6].trim();
    IdentityToken::parse_unverified(token)
        .map_err(|e| IapError::cookie_parse(redact(line), format!("value is not a token: {e}")))?;

    Ok(Some((token.to_string(), expires_at)))
}

//! `git-remote-iap` command-line entry point
//!
//! Installed as `git-remote-https+iap`, git runs it with `<remote> <url>` for
//! every `https+iap://` remote. The other subcommands are for humans.

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use git_remote_iap::{
    Domain, DomainSettings, GitCli, HELPER_NAME, IapError, OAuthCredentials, OAuthFlow,
    Passthrough, Result, TokenLifecycle, TokenState, VERSION, check_git_version,
    configure_domain,
};

/// Environment variable holding the log filter
const LOG_ENV: &str = "GIT_IAP_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "git-remote-iap",
    version,
    about = "Git remote helper for HTTPS remotes behind Google Cloud Identity-Aware Proxy",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Log at debug level (overridden by GIT_IAP_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Remote name, as passed by git
    remote: Option<String>,

    /// Remote URL, as passed by git
    url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Make sure a valid IAP token is cached for URL, without running git
    Check {
        /// Remote URL, e.g. https+iap://git.example.com/repo.git
        url: String,

        /// Ignore cached tokens and authorize in the browser again
        #[arg(long)]
        reauth: bool,
    },

    /// Show the cached token state for URL (no network access)
    Status {
        /// Remote URL
        url: String,
    },

    /// One-time setup of an IAP-protected host in global git config
    Configure {
        /// Host URL pattern, e.g. https://git.example.com or https://*.example.com
        #[arg(long)]
        url: String,

        /// OAuth client id of the desktop helper app
        #[arg(long)]
        helper_id: String,

        /// OAuth client secret of the desktop helper app
        #[arg(long)]
        helper_secret: String,

        /// OAuth client id of the IAP resource (token audience)
        #[arg(long)]
        client_id: String,
    },

    /// Link git-remote-https+iap next to this binary so git can find it
    Install {
        /// Directory to install into (default: this binary's directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print helper and git versions
    Version,
}

#[tokio::main]
async fn main() {
    let args: Vec<OsString> = std::env::args_os().collect();
    let cli = match helper_invocation(&args, std::env::var_os("GIT_DIR").is_some()) {
        Some(cli) => cli,
        None => Cli::parse_from(args),
    };
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::debug!("fatal error: {e:?}");
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    }
}

/// Recognize `<remote> <url>` as sent by git, which exports `GIT_DIR` to
/// remote helpers. A remote may be named like a subcommand, so this runs
/// before clap sees the arguments.
fn helper_invocation(args: &[OsString], from_git: bool) -> Option<Cli> {
    let [_, remote, url] = args else {
        return None;
    };
    let (remote, url) = (remote.to_str()?, url.to_str()?);
    if !from_git || remote.starts_with('-') || !url.contains("://") {
        return None;
    }
    Some(Cli {
        verbose: false,
        command: None,
        remote: Some(remote.to_string()),
        url: Some(url.to_string()),
    })
}

/// Diagnostics go to stderr; stdout carries the remote-helper protocol
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "git_remote_iap=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Some(Command::Check { url, reauth }) => check(&url, reauth).await,
        Some(Command::Status { url }) => status(&url).await,
        Some(Command::Configure {
            url,
            helper_id,
            helper_secret,
            client_id,
        }) => {
            let credentials = OAuthCredentials::builder()
                .client_id(helper_id)
                .client_secret(helper_secret)
                .audience(client_id)
                .build();
            let cookie_file = configure_domain(&GitCli::new(), &url, &credentials).await?;
            println!("Configured {url}");
            println!("  cookie jar: {cookie_file}");
            println!("Clone with: git clone {}", url.replacen("https://", "https+iap://", 1));
            Ok(0)
        }
        Some(Command::Install { dir }) => install(dir),
        Some(Command::Version) => version().await,
        None => {
            let remote = cli
                .remote
                .ok_or_else(|| IapError::invalid_url("usage: git-remote-iap <remote> <url>"))?;
            let url = match cli.url {
                Some(url) => url,
                // git may pass the URL as the only argument
                None if remote.contains("://") => remote.clone(),
                None => return Err(IapError::invalid_url(format!("no URL given for remote '{remote}'"))),
            };
            remote_helper(&remote, &url).await
        }
    }
}

async fn resolve(url: &str) -> Result<(Domain, DomainSettings)> {
    let domain = Domain::from_url(url)?;
    let settings = DomainSettings::resolve(&GitCli::new(), &domain).await?;
    Ok((domain, settings))
}

async fn remote_helper(remote: &str, url: &str) -> Result<i32> {
    tracing::debug!(remote, url, "{HELPER_NAME} invoked");
    let (domain, settings) = resolve(url).await?;

    let cookie = TokenLifecycle::new(OAuthFlow::new())
        .ensure_token(&domain, &settings)
        .await?;

    let passthrough = Passthrough::new()?;
    match passthrough.hand_off(remote, url, &cookie.token).await? {}
}

async fn check(url: &str, reauth: bool) -> Result<i32> {
    let (domain, settings) = resolve(url).await?;
    let cookie = TokenLifecycle::new(OAuthFlow::new())
        .force_reconsent(reauth)
        .ensure_token(&domain, &settings)
        .await?;

    let remaining = cookie.remaining_validity().unwrap_or_default().as_secs();
    println!(
        "{domain}: token valid for {}m{:02}s (cookie jar {})",
        remaining / 60,
        remaining % 60,
        cookie.jar_path.display()
    );
    Ok(0)
}

async fn status(url: &str) -> Result<i32> {
    let (domain, settings) = resolve(url).await?;
    let state = TokenLifecycle::new(OAuthFlow::new()).inspect(&domain, &settings);

    match &state {
        TokenState::Valid(cookie) => {
            let remaining = cookie.remaining_validity().unwrap_or_default().as_secs();
            println!("{domain}: valid, expires in {}m{:02}s", remaining / 60, remaining % 60);
        }
        TokenState::Expired(cookie) => {
            println!("{domain}: expired at {}", cookie.claims.expires_at);
        }
        TokenState::Missing => {
            println!("{domain}: no token in {}", settings.jar_path().display());
        }
    }
    Ok(match state {
        TokenState::Valid(_) => 0,
        _ => 1,
    })
}

async fn version() -> Result<i32> {
    println!("git-remote-iap {VERSION}");
    match Passthrough::new() {
        Ok(passthrough) => {
            let (git_version, supported) = check_git_version(passthrough.program()).await?;
            println!("git {git_version}");
            if !supported {
                eprintln!(
                    "warning: git {git_version} is older than {}; http.extraHeader is unsupported",
                    git_remote_iap::MIN_GIT_VERSION
                );
            }
        }
        Err(e) => eprintln!("warning: {e}"),
    }
    Ok(0)
}

fn install(dir: Option<PathBuf>) -> Result<i32> {
    let exe = std::env::current_exe()?;
    let dir = match dir {
        Some(dir) => dir,
        None => exe
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| IapError::process_exec("cannot determine install directory"))?,
    };
    std::fs::create_dir_all(&dir)?;

    let link = dir.join(format!("{HELPER_NAME}{}", std::env::consts::EXE_SUFFIX));
    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(&exe, &link)?;
    #[cfg(not(unix))]
    std::fs::copy(&exe, &link).map(|_| ())?;

    println!("Installed {} -> {}", link.display(), exe.display());
    if which::which(HELPER_NAME).is_err() {
        println!("note: {} is not on PATH; git will not find the helper", dir.display());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_remote_named_like_subcommand_runs_helper() {
        let argv = args(&["git-remote-https+iap", "check", "https+iap://git.example.com/r.git"]);
        let cli = helper_invocation(&argv, true).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.remote.as_deref(), Some("check"));
        assert_eq!(cli.url.as_deref(), Some("https+iap://git.example.com/r.git"));
    }

    #[test]
    fn test_subcommands_outside_git_use_clap() {
        let argv = args(&["git-remote-iap", "check", "https+iap://git.example.com/r.git"]);
        assert!(helper_invocation(&argv, false).is_none());

        let cli = Cli::try_parse_from(argv).unwrap();
        assert!(matches!(cli.command, Some(Command::Check { reauth: false, .. })));
    }

    #[test]
    fn test_flags_and_single_argument_use_clap() {
        assert!(helper_invocation(&args(&["x", "-v", "https://h"]), true).is_none());
        assert!(helper_invocation(&args(&["x", "origin"]), true).is_none());
        assert!(helper_invocation(&args(&["x", "origin", "not-a-url"]), true).is_none());
    }

    #[test]
    fn test_plain_remote_parses_positionally() {
        let cli = Cli::try_parse_from(["git-remote-iap", "origin", "https+iap://h/r"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.remote.as_deref(), Some("origin"));
    }
}

//! Loopback listener that receives the OAuth redirect
//!
//! Binds one ephemeral port on 127.0.0.1, answers the browser's redirect with
//! a small HTML page and yields the authorization code. The socket is closed
//! as soon as the listener is dropped, whether the wait succeeded, failed or
//! was cancelled.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{IapError, Result};

/// How long to wait for the user to finish consenting in the browser
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Connections that send no request head within this window are dropped
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization Successful</h1>\
<p>git can now reach the repository. You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authorization Failed</h1>\
<p>Check the terminal for details. You can close this window.</p></body></html>";

/// Query parameters carried by the redirect
#[derive(Debug, Default, PartialEq, Eq)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Local HTTP endpoint for a single OAuth redirect
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: Url,
}

impl CallbackListener {
    /// Bind an ephemeral loopback port
    ///
    /// # Errors
    /// Returns an I/O error if no port can be bound
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = Url::parse(&format!("http://127.0.0.1:{port}/"))?;
        tracing::debug!(port, "OAuth callback listener bound");
        Ok(Self {
            listener,
            redirect_uri,
        })
    }

    /// Redirect URI to register in the authorization request
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri.as_str()
    }

    /// Wait for the redirect and return its authorization code
    ///
    /// Each connection is served on its own task, so an idle preconnect
    /// from the browser cannot hold up the real redirect. Requests carrying
    /// neither `code` nor `error` (a favicon fetch, a health check) get a
    /// 404 and the wait continues.
    ///
    /// # Errors
    ///
    /// - `IapError::Cancelled` when `cancel` fires
    /// - `IapError::BrowserFlow` on timeout, an `error` redirect, or a
    ///   `state` mismatch
    pub async fn wait_for_code(
        self,
        expected_state: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<String> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        // Aborted on drop, which closes any connection still open
        let mut connections: JoinSet<Result<Option<String>>> = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(IapError::Cancelled),
                () = &mut deadline => {
                    return Err(IapError::browser_flow(format!(
                        "timed out after {}s waiting for the browser redirect",
                        timeout.as_secs()
                    )));
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "OAuth callback connection");
                        connections.spawn(serve_connection(
                            stream,
                            self.redirect_uri.clone(),
                            expected_state.to_string(),
                        ));
                    }
                    Err(e) => tracing::debug!("Failed to accept callback connection: {e}"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Ok(Ok(Some(code))) => return Ok(code),
                        Ok(Ok(None)) => {}
                        Ok(Err(IapError::Io(e))) => {
                            tracing::debug!("Ignoring broken callback connection: {e}");
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(e) => tracing::debug!("Callback connection task failed: {e}"),
                    }
                }
            }
        }
    }
}

/// Answer one connection, yielding the code if it carried the redirect
async fn serve_connection(
    mut stream: TcpStream,
    redirect_uri: Url,
    expected_state: String,
) -> Result<Option<String>> {
    let head = match tokio::time::timeout(REQUEST_HEAD_TIMEOUT, read_request_head(&mut stream)).await
    {
        Ok(head) => head?,
        Err(_) => {
            tracing::debug!("Closing idle callback connection");
            return Ok(None);
        }
    };
    let Some(request_line) = head.lines().next() else {
        return Ok(None);
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    if method != "GET" {
        respond(&mut stream, "405 Method Not Allowed", FAILURE_PAGE).await?;
        return Ok(None);
    }

    let params = parse_target(&redirect_uri, target);

    if let Some(error) = params.error {
        respond(&mut stream, "200 OK", FAILURE_PAGE).await?;
        return Err(IapError::browser_flow(format!(
            "authorization server returned error: {error}"
        )));
    }

    let Some(code) = params.code else {
        respond(&mut stream, "404 Not Found", FAILURE_PAGE).await?;
        return Ok(None);
    };

    if params.state.as_deref() != Some(expected_state.as_str()) {
        respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await?;
        return Err(IapError::browser_flow("OAuth state mismatch; please try again"));
    }

    respond(&mut stream, "200 OK", SUCCESS_PAGE).await?;
    Ok(Some(code))
}

fn parse_target(redirect_uri: &Url, target: &str) -> RedirectParams {
    let Ok(url) = redirect_uri.join(target) else {
        return RedirectParams::default();
    };
    let mut params = RedirectParams::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => {}
        }
    }
    params
}

async fn read_request_head(stream: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(2).any(|w| w == b"\r\n") || buffer.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(url: String) -> reqwest::Response {
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(url)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_redirect_uri_is_loopback() {
        let listener = CallbackListener::bind().await.unwrap();
        assert!(listener.redirect_uri().starts_with("http://127.0.0.1:"));
        assert!(listener.redirect_uri().ends_with('/'));
    }

    #[tokio::test]
    async fn test_receives_code() {
        let listener = CallbackListener::bind().await.unwrap();
        let uri = listener.redirect_uri().to_string();
        let cancel = CancellationToken::new();

        let browser = tokio::spawn(async move {
            get(format!("{uri}favicon.ico")).await;
            get(format!("{uri}?state=s1&code=4%2F0Ab&scope=email")).await
        });

        let code = listener
            .wait_for_code("s1", &cancel, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, "4/0Ab");

        let response = browser.await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Successful"));
    }

    #[tokio::test]
    async fn test_idle_preconnect_does_not_block_redirect() {
        let listener = CallbackListener::bind().await.unwrap();
        let uri = listener.redirect_uri().to_string();
        let addr = uri
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        let cancel = CancellationToken::new();

        let browser = tokio::spawn(async move {
            // Speculative connection that never sends a request
            let idle = TcpStream::connect(addr).await.unwrap();
            let response = get(format!("{uri}?state=s1&code=abc")).await;
            drop(idle);
            response
        });

        let code = listener
            .wait_for_code("s1", &cancel, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(code, "abc");
        assert_eq!(browser.await.unwrap().status(), 200);
    }

    #[test]
    fn test_parse_target_ignores_unknown_params() {
        let base = Url::parse("http://127.0.0.1:1234/").unwrap();
        let params = parse_target(&base, "/?code=c&state=s&scope=email+openid");
        assert_eq!(
            params,
            RedirectParams {
                code: Some("c".to_string()),
                state: Some("s".to_string()),
                error: None,
            }
        );
        assert_eq!(parse_target(&base, "/favicon.ico"), RedirectParams::default());
    }

    #[tokio::test]
    async fn test_state_mismatch_fails() {
        let listener = CallbackListener::bind().await.unwrap();
        let uri = listener.redirect_uri().to_string();
        let cancel = CancellationToken::new();

        tokio::spawn(async move { get(format!("{uri}?state=evil&code=abc")).await });

        let err = listener
            .wait_for_code("s1", &cancel, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, IapError::BrowserFlow(ref m) if m.contains("state")));
    }

    #[tokio::test]
    async fn test_error_redirect_fails() {
        let listener = CallbackListener::bind().await.unwrap();
        let uri = listener.redirect_uri().to_string();
        let cancel = CancellationToken::new();

        tokio::spawn(async move { get(format!("{uri}?error=access_denied&state=s1")).await });

        let err = listener
            .wait_for_code("s1", &cancel, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let listener = CallbackListener::bind().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = listener
            .wait_for_code("s1", &cancel, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, IapError::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = CallbackListener::bind().await.unwrap();
        let cancel = CancellationToken::new();

        let err = listener
            .wait_for_code("s1", &cancel, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, IapError::BrowserFlow(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_listener_closed_after_wait() {
        let listener = CallbackListener::bind().await.unwrap();
        let addr = listener
            .redirect_uri()
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = listener.wait_for_code("s1", &cancel, Duration::from_secs(1)).await;

        assert!(TcpStream::connect(addr).await.is_err());
    }
}

//! Local HTTP listener for the OAuth redirect
//!
//! A [`CallbackListener`] binds one ephemeral 127.0.0.1 port, accepts the
//! single browser redirect carrying `code` and `state` (or `error` on
//! denial), and resolves a oneshot future with the parsed result. The
//! listener socket and its accept task are torn down on every exit path:
//! resolution, timeout, and drop.
//!
//! Requests for other paths (typically `/favicon.ico` from the browser) are
//! answered with `404` and do not consume the pending resolution.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::error::{Result, TetherError};

/// HTML shown in the browser tab after a successful authorization.
const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h2>Authorization complete.</h2><p>You may close this tab and return to your MCP client.</p></body></html>";

/// HTML shown when the authorization server reported an error.
const DENIED_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h2>Authorization was not completed.</h2><p>You may close this tab.</p></body></html>";

/// Response for unrelated requests such as favicon probes.
const NOT_FOUND: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nnot found";

/// The parsed result of a successful OAuth redirect.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    /// The authorization code to exchange at the token endpoint.
    pub code: String,
    /// The `state` nonce echoed by the authorization server. The caller
    /// validates it against the nonce it issued.
    pub state: String,
}

/// A short-lived HTTP endpoint receiving one OAuth redirect.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use mcp_tether::auth::callback::CallbackListener;
///
/// # async fn example() -> anyhow::Result<()> {
/// let listener = CallbackListener::bind(0).await?;
/// println!("redirect_uri: {}", listener.redirect_uri());
/// let result = listener.wait(Duration::from_secs(300)).await?;
/// println!("code: {}", result.code);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CallbackListener {
    port: u16,
    redirect_uri: String,
    rx: oneshot::Receiver<Result<CallbackResult>>,
    task: tokio::task::JoinHandle<()>,
}

impl CallbackListener {
    /// Binds a listener on `127.0.0.1:port` (`0` asks the OS for an
    /// ephemeral port) and starts accepting in the background.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Auth`] when the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| TetherError::Auth(format!("failed to bind redirect listener: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TetherError::Auth(format!("failed to read listener address: {e}")))?;
        let port = local_addr.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, tx));

        Ok(Self {
            port,
            redirect_uri,
            rx,
            task,
        })
    }

    /// The bound local port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI to register with the authorization server.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Awaits the redirect, bounded by `timeout`.
    ///
    /// Consumes the listener; the socket is closed when this returns,
    /// whichever way it returns.
    ///
    /// # Errors
    ///
    /// - [`TetherError::AuthorizationTimedOut`] when no redirect arrives in
    ///   time.
    /// - [`TetherError::AuthorizationDenied`] when the redirect carried an
    ///   `error` parameter.
    /// - [`TetherError::Auth`] for malformed redirects.
    pub async fn wait(mut self, timeout: std::time::Duration) -> Result<CallbackResult> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                Err(TetherError::Auth("callback listener terminated unexpectedly".to_string())
                    .into())
            }
            Err(_) => Err(TetherError::AuthorizationTimedOut(format!(
                "no OAuth callback received within {}s",
                timeout.as_secs()
            ))
            .into()),
        }
    }
}

impl Drop for CallbackListener {
    /// Stops the accept task, closing the listening socket.
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accepts connections until one carries the OAuth redirect, then resolves
/// `tx` and exits. Unrelated requests get a `404` and the loop continues.
async fn accept_loop(listener: TcpListener, tx: oneshot::Sender<Result<CallbackResult>>) {
    loop {
        let (stream, _peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                let _ = tx.send(Err(TetherError::Auth(format!(
                    "failed to accept OAuth callback connection: {e}"
                ))
                .into()));
                return;
            }
        };

        match handle_connection(stream).await {
            Some(outcome) => {
                let _ = tx.send(outcome);
                return;
            }
            None => continue,
        }
    }
}

/// Reads one HTTP request from `stream`.
///
/// Returns `Some(outcome)` when the request was the OAuth redirect
/// (successful or denied), `None` when it was unrelated and the accept loop
/// should keep going.
async fn handle_connection(stream: TcpStream) -> Option<Result<CallbackResult>> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // First line is the request line; headers follow until a blank line.
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.is_err() {
        return None;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header).await {
            Ok(0) => break,
            Ok(_) if header.trim().is_empty() => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    // "GET /callback?code=...&state=... HTTP/1.1"
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    if !path.starts_with("/callback") {
        let _ = write_half.write_all(NOT_FOUND.as_bytes()).await;
        let _ = write_half.shutdown().await;
        return None;
    }

    let outcome = parse_redirect(path);
    let page = if outcome.is_ok() {
        SUCCESS_PAGE
    } else {
        DENIED_PAGE
    };
    let _ = write_half.write_all(page.as_bytes()).await;
    let _ = write_half.shutdown().await;

    Some(outcome)
}

/// Parses the redirect path's query parameters into a [`CallbackResult`].
fn parse_redirect(path: &str) -> Result<CallbackResult> {
    // Leverage the url crate's query parsing (percent-decoding included)
    // by anchoring the path to a dummy base.
    let parsed = url::Url::parse(&format!("http://127.0.0.1{path}"))
        .map_err(|e| TetherError::Auth(format!("malformed callback request: {e}")))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let detail = match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(TetherError::AuthorizationDenied(detail).into());
    }

    let code =
        code.ok_or_else(|| TetherError::Auth("callback missing `code` parameter".to_string()))?;
    let state =
        state.ok_or_else(|| TetherError::Auth("callback missing `state` parameter".to_string()))?;

    Ok(CallbackResult { code, state })
}

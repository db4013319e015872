//! Streamable HTTP remote transport
//!
//! Every outbound JSON-RPC message is an HTTP POST to the server endpoint.
//! The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE stream carrying one or more messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! [`StreamableTransport::connect`] additionally opens an optional GET
//! stream for unsolicited server notifications; servers that do not offer
//! one answer `405 Method Not Allowed`, which is tolerated.
//!
//! # Session management
//!
//! A successful POST may return an `MCP-Session-Id` response header. When
//! present, the value is stored and attached to every subsequent request.
//! A `404` while a session is active means the session expired; the
//! transport reports itself closed. `close` issues a best-effort DELETE to
//! terminate the session server-side.
//!
//! # Authorization
//!
//! The transport is constructed with an optional bearer token and never
//! mutates it. A `401 Unauthorized` response surfaces as
//! [`TetherError::Auth`] carrying the `WWW-Authenticate` value; recovery
//! (obtaining a token and building a replacement transport) is the
//! connection manager's job.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, TetherError};
use crate::transport::events::scan_sse_stream;
use crate::transport::{channel_stream, Transport, TransportKind};

/// Protocol revision header value sent on every request.
const PROTOCOL_VERSION: &str = "2025-03-26";

/// Streamable HTTP transport for one remote server.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use mcp_tether::transport::streamable::StreamableTransport;
///
/// let transport = StreamableTransport::new(
///     Url::parse("https://api.example.com/mcp").unwrap(),
///     Some("access-token".to_string()),
///     Duration::from_secs(30),
/// );
/// ```
#[derive(Debug)]
pub struct StreamableTransport {
    http_client: Arc<reqwest::Client>,
    endpoint: Url,
    /// Bearer token attached to every request, when present.
    auth_token: Option<String>,
    /// Active session ID, captured from a response header.
    session_id: Arc<RwLock<Option<String>>>,
    /// Sender for inbound JSON-RPC message strings.
    response_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver exposed via `receive()`.
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Sender for transport diagnostics.
    error_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver exposed via `receive_err()`.
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Last SSE event ID for `Last-Event-ID` resumption.
    last_event_id: Arc<std::sync::Mutex<Option<String>>>,
    /// Terminates SSE scan tasks and ends the receive stream.
    cancel: CancellationToken,
}

impl StreamableTransport {
    /// Constructs a transport targeting `endpoint`. No network I/O happens
    /// until [`connect`](Transport::connect) or the first `send`.
    pub fn new(endpoint: Url, auth_token: Option<String>, timeout: Duration) -> Self {
        let http_client = Arc::new(
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                // Client construction only fails when TLS initialisation
                // fails, which is fatal on any supported platform.
                .expect("failed to build reqwest client"),
        );

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Self {
            http_client,
            endpoint,
            auth_token,
            session_id: Arc::new(RwLock::new(None)),
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            last_event_id: Arc::new(std::sync::Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Applies the headers common to every request: protocol version,
    /// bearer token, session ID, and SSE resumption ID.
    async fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req.header("MCP-Protocol-Version", PROTOCOL_VERSION);

        if let Some(ref token) = self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        {
            let session = self.session_id.read().await;
            if let Some(ref id) = *session {
                req = req.header("MCP-Session-Id", id.as_str());
            }
        }
        if let Some(id) = self.last_event_id.lock().unwrap().clone() {
            req = req.header("Last-Event-ID", id);
        }

        req
    }

    /// Spawns a task that scans an SSE response body, tracking event IDs,
    /// dropping pings, and forwarding data payloads to the receive stream.
    fn spawn_sse_scan(
        &self,
        byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    ) {
        let response_tx = self.response_tx.clone();
        let last_event_id = Arc::clone(&self.last_event_id);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let scan = scan_sse_stream(byte_stream, |event| {
                if let Some(ref id) = event.id {
                    *last_event_id.lock().unwrap() = Some(id.clone());
                }
                if event.is_ping() || event.data.is_empty() {
                    return;
                }
                let _ = response_tx.send(event.data);
            });
            tokio::select! {
                _ = cancel.cancelled() => {}
                () = scan => {}
            }
        });
    }
}

#[async_trait::async_trait]
impl Transport for StreamableTransport {
    /// Opens the optional GET notification stream, surfacing authorization
    /// and protocol failures.
    ///
    /// Outcomes:
    ///
    /// - `200` -- the SSE scan task is spawned; unsolicited notifications
    ///   will arrive on `receive()`.
    /// - `405` -- the server offers no GET stream; tolerated, POSTs still
    ///   work.
    /// - `401` -- [`TetherError::Auth`] with the `WWW-Authenticate` value.
    /// - anything else -- [`TetherError::Transport`], prompting the
    ///   connection manager to consider a fallback transport kind.
    async fn connect(&self) -> Result<()> {
        let req = self
            .http_client
            .get(self.endpoint.clone())
            .header("Accept", "text/event-stream");
        let req = self.apply_headers(req).await;

        let response = req
            .send()
            .await
            .map_err(|e| TetherError::Transport(format!("GET stream request failed: {e}")))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_authenticate = header_string(&response, "WWW-Authenticate");
            return Err(TetherError::Auth(www_authenticate).into());
        }
        if status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            tracing::debug!("server offers no GET notification stream");
            return Ok(());
        }
        if !status.is_success() {
            return Err(
                TetherError::Transport(format!("GET stream returned HTTP {status}")).into(),
            );
        }

        if let Some(id) = header_opt(&response, "MCP-Session-Id") {
            let mut session = self.session_id.write().await;
            session.get_or_insert(id);
        }

        self.spawn_sse_scan(response.bytes_stream());
        Ok(())
    }

    /// POSTs one JSON-RPC message and dispatches the response by status and
    /// content type.
    async fn send(&self, message: String) -> Result<()> {
        let req = self
            .http_client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message);
        let req = self.apply_headers(req).await;

        let response = req
            .send()
            .await
            .map_err(|e| TetherError::Transport(format!("HTTP POST failed: {e}")))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_authenticate = header_string(&response, "WWW-Authenticate");
            return Err(TetherError::Auth(www_authenticate).into());
        }

        // 404 while a session is active means the server expired it.
        if status == reqwest::StatusCode::NOT_FOUND {
            let had_session = {
                let mut session = self.session_id.write().await;
                session.take().is_some()
            };
            if had_session {
                return Err(
                    TetherError::TransportClosed("server session expired".to_string()).into(),
                );
            }
            return Err(TetherError::Transport("HTTP 404 Not Found".to_string()).into());
        }

        // Notification acknowledgement; no body expected.
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(
                TetherError::Transport(format!("HTTP POST returned status {status}")).into(),
            );
        }

        // Capture the session ID handed out on the first successful POST.
        if let Some(id) = header_opt(&response, "MCP-Session-Id") {
            let mut session = self.session_id.write().await;
            session.get_or_insert(id);
        }

        let content_type = header_string(&response, "Content-Type");
        if content_type.contains("text/event-stream") {
            self.spawn_sse_scan(response.bytes_stream());
        } else {
            let body = response.text().await.map_err(|e| {
                TetherError::Transport(format!("failed to read response body: {e}"))
            })?;
            if !body.is_empty() {
                let _ = self.response_tx.send(body);
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.response_rx), self.cancel.clone())
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.error_rx), self.cancel.clone())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Streamable
    }

    /// Stops the SSE scan tasks, ends the receive stream, and issues a
    /// best-effort DELETE to terminate the server-side session.
    async fn close(&self) {
        self.cancel.cancel();

        let session_id = {
            let mut session = self.session_id.write().await;
            session.take()
        };
        if let Some(id) = session_id {
            let req = self
                .http_client
                .delete(self.endpoint.clone())
                .header("MCP-Session-Id", id)
                .timeout(Duration::from_secs(5));
            let req = if let Some(ref token) = self.auth_token {
                req.header("Authorization", format!("Bearer {token}"))
            } else {
                req
            };
            if let Err(e) = req.send().await {
                tracing::debug!(error = %e, "session DELETE failed");
            }
        }
    }
}

/// Reads a response header as an owned string, empty when absent.
fn header_string(response: &reqwest::Response, name: &str) -> String {
    header_opt(response, name).unwrap_or_default()
}

/// Reads a response header as `Option<String>`.
fn header_opt(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

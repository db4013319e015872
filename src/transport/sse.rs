//! Legacy HTTP+SSE remote transport
//!
//! The older MCP HTTP transport: the client opens a long-lived GET event
//! stream, the server's first event (`event: endpoint`) announces the URL
//! messages must be POSTed to, and every subsequent `data:` event carries an
//! inbound JSON-RPC message.
//!
//! The GET stream is the connection's lifeline: when the server ends it,
//! this transport reports itself closed (its `receive` stream ends). POST
//! failures for individual messages are ordinary send errors and do not
//! close the transport.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, TetherError};
use crate::transport::events::scan_sse_stream;
use crate::transport::{channel_stream, Transport, TransportKind};

/// Legacy SSE transport for one remote server.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use mcp_tether::transport::sse::SseTransport;
///
/// let transport = SseTransport::new(
///     Url::parse("https://api.example.com/sse").unwrap(),
///     None,
///     Duration::from_secs(30),
/// );
/// ```
#[derive(Debug)]
pub struct SseTransport {
    http_client: Arc<reqwest::Client>,
    endpoint: Url,
    /// Bearer token attached to every request, when present.
    auth_token: Option<String>,
    /// POST target announced by the server's `endpoint` event.
    post_url: Arc<RwLock<Option<Url>>>,
    /// Per-request timeout for POSTs and for awaiting the `endpoint` event.
    request_timeout: Duration,
    /// Sender for inbound JSON-RPC message strings.
    response_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver exposed via `receive()`.
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Ends the receive stream and stops the scan task. Fires both when the
    /// caller closes the transport and when the server ends the event
    /// stream.
    cancel: CancellationToken,
    /// Set only by an explicit `close` call. The event stream ending on its
    /// own does not forbid further POSTs; a deliberate close does.
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl SseTransport {
    /// Constructs a transport targeting the SSE endpoint `endpoint`. No
    /// network I/O happens until [`connect`](Transport::connect).
    ///
    /// `request_timeout` bounds each POST and the wait for the server's
    /// `endpoint` event; the GET stream itself is long-lived and carries
    /// only a connect timeout.
    pub fn new(endpoint: Url, auth_token: Option<String>, request_timeout: Duration) -> Self {
        let http_client = Arc::new(
            reqwest::Client::builder()
                // No total timeout: the event stream stays open for the
                // connection's lifetime. POSTs set a per-request timeout.
                .connect_timeout(request_timeout)
                .build()
                .expect("failed to build reqwest client"),
        );

        let (response_tx, response_rx) = mpsc::unbounded_channel();

        Self {
            http_client,
            endpoint,
            auth_token,
            post_url: Arc::new(RwLock::new(None)),
            request_timeout,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            cancel: CancellationToken::new(),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Adds the bearer header when a token is configured.
    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token {
            Some(ref token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    /// Opens the event stream and waits for the server's `endpoint` event.
    ///
    /// # Errors
    ///
    /// - [`TetherError::Auth`] on `401`, carrying the `WWW-Authenticate`
    ///   value.
    /// - [`TetherError::Transport`] on other HTTP failures or when the
    ///   `endpoint` event does not arrive within the request timeout.
    async fn connect(&self) -> Result<()> {
        let req = self
            .http_client
            .get(self.endpoint.clone())
            .header("Accept", "text/event-stream");
        let req = self.authorize(req);

        let response = req
            .send()
            .await
            .map_err(|e| TetherError::Transport(format!("SSE stream request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_authenticate = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(TetherError::Auth(www_authenticate).into());
        }
        if !status.is_success() {
            return Err(
                TetherError::Transport(format!("SSE stream returned HTTP {status}")).into(),
            );
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let response_tx = self.response_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let scan = scan_sse_stream(response.bytes_stream(), |event| {
                if event.event.as_deref() == Some("endpoint") {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data);
                    }
                    return;
                }
                if event.is_ping() || event.data.is_empty() {
                    return;
                }
                let _ = response_tx.send(event.data);
            });
            tokio::select! {
                _ = cancel.cancelled() => {}
                () = scan => {
                    // The server ended the event stream: the connection is
                    // gone. Cancelling ends the receive stream so the
                    // bridge observes the close.
                    cancel.cancel();
                }
            }
        });

        let announced = tokio::time::timeout(self.request_timeout, endpoint_rx)
            .await
            .map_err(|_| {
                TetherError::Transport(format!(
                    "server did not announce a message endpoint within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|_| {
                TetherError::Transport("event stream ended before announcing an endpoint".into())
            })?;

        let resolved = resolve_post_url(&self.endpoint, &announced)?;
        tracing::debug!(post_url = %resolved, "SSE message endpoint announced");
        let mut post_url = self.post_url.write().await;
        *post_url = Some(resolved);

        Ok(())
    }

    /// POSTs one JSON-RPC message to the announced endpoint.
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(
                TetherError::TransportClosed("SSE transport closed".to_string()).into(),
            );
        }

        let post_url = {
            let post_url = self.post_url.read().await;
            post_url.clone().ok_or_else(|| {
                TetherError::Transport("transport not connected: no message endpoint".to_string())
            })?
        };

        let req = self
            .http_client
            .post(post_url)
            .header("Content-Type", "application/json")
            .timeout(self.request_timeout)
            .body(message);
        let req = self.authorize(req);

        let response = req
            .send()
            .await
            .map_err(|e| TetherError::Transport(format!("HTTP POST failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_authenticate = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(TetherError::Auth(www_authenticate).into());
        }
        if !status.is_success() {
            return Err(
                TetherError::Transport(format!("HTTP POST returned status {status}")).into(),
            );
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.response_rx), self.cancel.clone())
    }

    /// The SSE transport has no diagnostic side channel.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Resolves the announced endpoint (absolute or relative) against the SSE
/// URL.
fn resolve_post_url(base: &Url, announced: &str) -> Result<Url> {
    base.join(announced).map_err(|e| {
        TetherError::Transport(format!("invalid message endpoint `{announced}`: {e}")).into()
    })
}

//! Remote connection establishment
//!
//! [`ConnectionManager`] opens the remote transport, choosing between
//! transport kinds per the configured strategy and recovering from
//! authorization failures lazily: the authorization hook is invoked only
//! when the server actually rejects a request for lacking credentials, and
//! at most once per connection attempt. This avoids the cost and side
//! effects of authentication (browser launch, lock contention) for servers
//! that require none, while recovering transparently for servers that do.
//!
//! A non-auth rejection of a transport kind (protocol mismatch, 4xx/5xx)
//! moves on to the next configured kind, keeping any token already
//! obtained. Exhausting all kinds surfaces a terminal
//! [`TetherError::ConnectionFailed`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::store::{CredentialStore, TokenSet};
use crate::error::{is_auth_error, Result, TetherError};
use crate::transport::sse::SseTransport;
use crate::transport::streamable::StreamableTransport;
use crate::transport::{Transport, TransportKind};

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Which remote transport kinds to try, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportStrategy {
    /// Streamable HTTP, falling back to legacy SSE. The default.
    HttpFirst,
    /// Legacy SSE, falling back to Streamable HTTP.
    SseFirst,
    /// Streamable HTTP only; no fallback.
    HttpOnly,
    /// Legacy SSE only; no fallback.
    SseOnly,
}

impl TransportStrategy {
    /// The ordered list of kinds this strategy attempts.
    pub fn kinds(&self) -> &'static [TransportKind] {
        match self {
            TransportStrategy::HttpFirst => &[TransportKind::Streamable, TransportKind::Sse],
            TransportStrategy::SseFirst => &[TransportKind::Sse, TransportKind::Streamable],
            TransportStrategy::HttpOnly => &[TransportKind::Streamable],
            TransportStrategy::SseOnly => &[TransportKind::Sse],
        }
    }
}

impl Default for TransportStrategy {
    fn default() -> Self {
        TransportStrategy::HttpFirst
    }
}

impl std::str::FromStr for TransportStrategy {
    type Err = TetherError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "http-first" => Ok(TransportStrategy::HttpFirst),
            "sse-first" => Ok(TransportStrategy::SseFirst),
            "http-only" => Ok(TransportStrategy::HttpOnly),
            "sse-only" => Ok(TransportStrategy::SseOnly),
            other => Err(TetherError::Config(format!(
                "unknown transport strategy `{other}` \
                 (expected http-first, sse-first, http-only, or sse-only)"
            ))),
        }
    }
}

impl std::fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportStrategy::HttpFirst => "http-first",
            TransportStrategy::SseFirst => "sse-first",
            TransportStrategy::HttpOnly => "http-only",
            TransportStrategy::SseOnly => "sse-only",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Establishes the remote transport for one server.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use url::Url;
/// use mcp_tether::auth::store::CredentialStore;
/// use mcp_tether::connect::{ConnectionManager, TransportStrategy};
///
/// # async fn example() -> anyhow::Result<()> {
/// let server_url = Url::parse("https://api.example.com/mcp")?;
/// let store = Arc::new(CredentialStore::for_server(&server_url)?);
/// let manager = ConnectionManager::new(
///     server_url,
///     TransportStrategy::HttpFirst,
///     Duration::from_secs(30),
///     store,
/// );
/// let transport = manager
///     .connect(|| async { anyhow::bail!("no authorization configured") })
///     .await?;
/// # let _ = transport;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    server_url: Url,
    strategy: TransportStrategy,
    request_timeout: Duration,
    store: Arc<CredentialStore>,
}

impl ConnectionManager {
    /// Creates a manager for `server_url` using the given strategy.
    pub fn new(
        server_url: Url,
        strategy: TransportStrategy,
        request_timeout: Duration,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            server_url,
            strategy,
            request_timeout,
            store,
        }
    }

    /// Opens a remote transport, invoking `auth_initializer` lazily on
    /// authorization failure.
    ///
    /// The first attempt uses the currently stored (non-expired) token, or
    /// no token at all. On a 401-class failure the initializer runs --
    /// exactly once across the whole call -- and the same kind is retried
    /// with the fresh token. Non-auth failures fall through to the next
    /// configured kind with credentials kept.
    ///
    /// # Errors
    ///
    /// Propagates an `auth_initializer` failure as terminal. Returns
    /// [`TetherError::ConnectionFailed`] when every configured kind has
    /// been rejected.
    pub async fn connect<F, Fut>(&self, auth_initializer: F) -> Result<Box<dyn Transport>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<TokenSet>>,
    {
        let mut token = self.stored_access_token()?;
        let mut authorized = false;
        let mut failures: Vec<String> = Vec::new();

        for &kind in self.strategy.kinds() {
            loop {
                let transport = self.build(kind, token.clone());
                match transport.connect().await {
                    Ok(()) => {
                        tracing::info!(kind = %kind, server = %self.server_url, "connected");
                        return Ok(transport);
                    }
                    Err(e) if is_auth_error(&e) && !authorized => {
                        tracing::info!(
                            kind = %kind,
                            "server requires authorization; starting coordinator"
                        );
                        let tokens = auth_initializer().await?;
                        token = Some(tokens.access_token);
                        authorized = true;
                        // Retry the same kind with the fresh token.
                    }
                    Err(e) => {
                        tracing::debug!(kind = %kind, error = %e, "transport kind rejected");
                        failures.push(format!("{kind}: {e}"));
                        break;
                    }
                }
            }
        }

        Err(TetherError::ConnectionFailed(format!(
            "all transport kinds exhausted for {}: {}",
            self.server_url,
            failures.join("; ")
        ))
        .into())
    }

    /// The stored access token, when present and not expired.
    fn stored_access_token(&self) -> Result<Option<String>> {
        let stored = self.store.load()?;
        Ok(stored
            .and_then(|creds| creds.tokens)
            .filter(|tokens| !tokens.is_expired())
            .map(|tokens| tokens.access_token))
    }

    /// Constructs a transport of the given kind.
    fn build(&self, kind: TransportKind, token: Option<String>) -> Box<dyn Transport> {
        match kind {
            TransportKind::Streamable => Box::new(StreamableTransport::new(
                self.server_url.clone(),
                token,
                self.request_timeout,
            )),
            TransportKind::Sse => Box::new(SseTransport::new(
                self.server_url.clone(),
                token,
                self.request_timeout,
            )),
            TransportKind::Stdio => {
                unreachable!("stdio is never a remote transport kind")
            }
        }
    }
}

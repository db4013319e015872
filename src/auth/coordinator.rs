//! Cross-process authorization orchestration
//!
//! [`AuthCoordinator`] turns the pieces in this module into the guarantee
//! the proxy depends on: **at most one interactive authorization per server
//! across all local processes at a time**.
//!
//! `ensure_authorized` is invoked lazily, only after the remote server
//! rejected a request for lacking credentials, so the stored access token is
//! treated as suspect. The resolution order is:
//!
//! 1. Refresh: when a refresh token is stored, exchange it. A refresh
//!    failure is recovered locally by falling through to step 2, never
//!    surfaced as fatal on its own.
//! 2. Coordinate: acquire the cross-process lock and run the interactive
//!    flow, or -- when another process holds the lock -- poll the credential
//!    store for the token set that process is about to write.
//!
//! The interactive flow itself: bind the callback listener, resolve client
//! credentials (registering if needed), generate a PKCE pair and a `state`
//! nonce, open the authorization URL in a browser (or print it), await the
//! redirect, validate `state`, and exchange the code.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::auth::callback::CallbackListener;
use crate::auth::discovery::AuthorizationServerMetadata;
use crate::auth::lock::FlowLock;
use crate::auth::pkce::{self, PkcePair};
use crate::auth::provider::OAuthProvider;
use crate::auth::store::TokenSet;
use crate::error::{Result, TetherError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing and behavior knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Total budget for acquiring the lock or observing a peer's token
    /// before giving up.
    pub lock_wait: Duration,

    /// Pause between lock acquisition attempts / store polls.
    pub lock_retry_interval: Duration,

    /// Age beyond which a held lock is considered abandoned even when its
    /// holder PID is alive. Must comfortably exceed `callback_timeout`,
    /// since a legitimate holder may spend that long waiting for the user.
    pub lock_stale_after: Duration,

    /// How long to wait for the OAuth redirect once the browser is open.
    pub callback_timeout: Duration,

    /// Local port for the redirect listener; `0` picks an ephemeral port.
    pub callback_port: u16,

    /// Whether to launch the system browser. When `false` (unattended
    /// operation) the authorization URL is only printed.
    pub open_browser: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(120),
            lock_retry_interval: Duration::from_millis(500),
            lock_stale_after: Duration::from_secs(600),
            callback_timeout: Duration::from_secs(300),
            callback_port: 0,
            open_browser: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthCoordinator
// ---------------------------------------------------------------------------

/// Orchestrates lock, listener, and provider into one idempotent
/// `ensure_authorized` operation, safe to call concurrently from multiple
/// local processes.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use url::Url;
/// use mcp_tether::auth::coordinator::{AuthCoordinator, CoordinatorConfig};
/// use mcp_tether::auth::provider::{OAuthConfig, OAuthProvider};
/// use mcp_tether::auth::store::CredentialStore;
/// use mcp_tether::net::HookPipeline;
///
/// # async fn example() -> anyhow::Result<()> {
/// let server_url = Url::parse("https://api.example.com/mcp")?;
/// let provider = Arc::new(OAuthProvider::new(
///     Arc::new(reqwest::Client::new()),
///     Arc::new(HookPipeline::standard()),
///     Arc::new(CredentialStore::for_server(&server_url)?),
///     OAuthConfig {
///         server_url,
///         client_name: "mcp-tether".to_string(),
///         scope: None,
///         static_client_id: None,
///         static_client_secret: None,
///     },
/// ));
/// let coordinator = AuthCoordinator::new(provider, CoordinatorConfig::default());
/// let tokens = coordinator.ensure_authorized().await?;
/// println!("access token: {}", tokens.access_token);
/// # Ok(())
/// # }
/// ```
pub struct AuthCoordinator {
    provider: Arc<OAuthProvider>,
    lock: FlowLock,
    config: CoordinatorConfig,
}

impl AuthCoordinator {
    /// Creates a coordinator. The lock path is derived from the provider's
    /// credential store, so all processes targeting the same server contend
    /// on the same file.
    pub fn new(provider: Arc<OAuthProvider>, config: CoordinatorConfig) -> Self {
        let lock = FlowLock::new(provider.store().lock_path(), config.lock_stale_after);
        Self {
            provider,
            lock,
            config,
        }
    }

    /// Produces a valid token set, refreshing or re-authorizing as needed.
    ///
    /// # Errors
    ///
    /// - [`TetherError::AuthorizationTimedOut`] when the lock holder neither
    ///   finishes nor dies within the wait budget, or the OAuth callback
    ///   never arrives.
    /// - [`TetherError::AuthorizationStateMismatch`] when the callback's
    ///   `state` does not match; no code exchange is attempted.
    /// - [`TetherError::AuthorizationDenied`] when the user or server
    ///   declined.
    /// - [`TetherError::TokenExchangeFailed`] when the code exchange fails.
    pub async fn ensure_authorized(&self) -> Result<TokenSet> {
        let metadata = self.provider.discover().await?;

        if let Some(tokens) = self.try_refresh(&metadata).await {
            return Ok(tokens);
        }

        self.coordinate(|| self.interactive_flow(&metadata)).await
    }

    /// Attempts a refresh-token exchange from stored credentials.
    ///
    /// Returns `None` -- and logs -- when no refresh token is stored, client
    /// credentials are missing, or the exchange fails; the caller falls back
    /// to the interactive flow.
    pub async fn try_refresh(
        &self,
        metadata: &AuthorizationServerMetadata,
    ) -> Option<TokenSet> {
        let stored = self.provider.store().load().ok()??;
        let tokens = stored.tokens?;
        let refresh_token = tokens.refresh_token?;
        let client = self.provider.client_information().ok()??;

        match self
            .provider
            .refresh_token(metadata, &client, &refresh_token)
            .await
        {
            Ok(fresh) => {
                tracing::debug!("access token refreshed");
                Some(fresh)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "token refresh failed; falling back to interactive authorization"
                );
                None
            }
        }
    }

    /// The cross-process de-duplication primitive.
    ///
    /// Acquires the lock and runs `interactive`, or -- while another local
    /// process holds the lock -- polls the credential store for the token
    /// set that process writes on completion. Exposed separately from
    /// [`ensure_authorized`](Self::ensure_authorized) so the coordination
    /// guarantee can be exercised without a browser.
    ///
    /// The lock is released on every exit path, including an `interactive`
    /// failure.
    pub async fn coordinate<F, Fut>(&self, interactive: F) -> Result<TokenSet>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenSet>>,
    {
        let wait_started = Utc::now();
        let deadline = tokio::time::Instant::now() + self.config.lock_wait;
        let store = self.provider.store();

        loop {
            match self.lock.try_acquire()? {
                Some(guard) => {
                    // A peer may have completed between our last poll and
                    // this acquisition; its token makes the flow redundant.
                    if let Some(tokens) = store.tokens_written_since(wait_started)? {
                        guard.release()?;
                        return Ok(tokens);
                    }

                    // Persist before releasing: waiters poll the store the
                    // instant the lock frees, and must find the token there.
                    let result = interactive().await.and_then(|tokens| {
                        store.save_tokens(&tokens)?;
                        Ok(tokens)
                    });
                    let released = guard.release();
                    let tokens = result?;
                    released?;
                    return Ok(tokens);
                }
                None => {
                    if let Some(tokens) = store.tokens_written_since(wait_started)? {
                        tracing::debug!(
                            "another process completed authorization; reusing its token"
                        );
                        return Ok(tokens);
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(TetherError::AuthorizationTimedOut(format!(
                            "another process held the authorization lock for {}s \
                             without producing a token",
                            self.config.lock_wait.as_secs()
                        ))
                        .into());
                    }
                    tokio::time::sleep(self.config.lock_retry_interval).await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Interactive flow
    // -----------------------------------------------------------------------

    /// Runs one browser-based authorization code flow.
    async fn interactive_flow(
        &self,
        metadata: &AuthorizationServerMetadata,
    ) -> Result<TokenSet> {
        pkce::verify_s256_support(metadata)?;

        let listener = CallbackListener::bind(self.config.callback_port).await?;
        let redirect_uri = listener.redirect_uri().to_string();

        let client = self.provider.ensure_client(metadata, &redirect_uri).await?;

        let pair = PkcePair::generate();
        let state = pkce::state_nonce();
        self.provider.store().save_pkce_verifier(&pair.verifier)?;

        let auth_url =
            self.provider
                .authorization_url(metadata, &client, &pair, &state, &redirect_uri)?;

        eprintln!("Open the following URL in your browser to authorize this proxy:\n{auth_url}");
        if self.config.open_browser {
            try_open_browser(auth_url.as_str());
        }

        let callback = listener.wait(self.config.callback_timeout).await?;

        if callback.state != state {
            return Err(TetherError::AuthorizationStateMismatch.into());
        }

        self.provider
            .exchange_code(metadata, &client, &callback.code, &pair.verifier, &redirect_uri)
            .await
    }
}

/// Best-effort launch of the authorization URL in the user's browser.
///
/// Failures are ignored; the URL has already been printed to stderr.
fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = url;
    }
}

//! OAuth 2.1 authorization code flow primitives
//!
//! [`OAuthProvider`] owns the non-interactive pieces of the flow for one
//! remote server: endpoint discovery, client registration, authorization URL
//! construction, the code-for-token exchange, and refresh-token exchange.
//! The interactive choreography around these pieces (lock, listener,
//! browser) lives in [`coordinator`](crate::auth::coordinator).
//!
//! Every outbound request passes through the [`HookPipeline`]. Token sets
//! are persisted to the [`CredentialStore`] on every successful exchange.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::auth::discovery::{self, AuthorizationServerMetadata};
use crate::auth::pkce::PkcePair;
use crate::auth::store::{ClientCredentials, CredentialStore, TokenSet};
use crate::error::{Result, TetherError};
use crate::net::HookPipeline;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-server OAuth configuration.
///
/// `static_client_id` (with optional secret) takes precedence over dynamic
/// registration and is never overwritten by it.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// The protected resource URL; also sent as the RFC 8707 `resource`
    /// parameter on every token request.
    pub server_url: Url,

    /// Human-readable name sent during Dynamic Client Registration.
    pub client_name: String,

    /// Space-separated scope string to request, if any.
    pub scope: Option<String>,

    /// Pre-configured client ID, bypassing registration entirely.
    pub static_client_id: Option<String>,

    /// Secret paired with `static_client_id` for confidential clients.
    pub static_client_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Raw token endpoint response (RFC 6749 section 5.1).
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Converts `expires_in` seconds into an absolute `expires_at` and
    /// produces the canonical [`TokenSet`].
    fn into_token_set(self) -> TokenSet {
        let expires_at = self.expires_in.map(|secs| {
            chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        });

        TokenSet {
            access_token: self.access_token,
            token_type: self.token_type,
            expires_at,
            refresh_token: self.refresh_token,
            scope: self.scope,
        }
    }
}

/// Minimal Dynamic Client Registration response (RFC 7591).
#[derive(Debug, serde::Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// OAuthProvider
// ---------------------------------------------------------------------------

/// Drives the OAuth 2.1 authorization code flow for one remote server.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use url::Url;
/// use mcp_tether::auth::provider::{OAuthConfig, OAuthProvider};
/// use mcp_tether::auth::store::CredentialStore;
/// use mcp_tether::net::HookPipeline;
///
/// # fn main() -> anyhow::Result<()> {
/// let server_url = Url::parse("https://api.example.com/mcp")?;
/// let provider = OAuthProvider::new(
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
/// );
/// # let _ = provider;
/// # Ok(())
/// # }
/// ```
pub struct OAuthProvider {
    http: Arc<reqwest::Client>,
    hooks: Arc<HookPipeline>,
    store: Arc<CredentialStore>,
    config: OAuthConfig,
}

impl OAuthProvider {
    /// Creates a provider for the server described by `config`.
    pub fn new(
        http: Arc<reqwest::Client>,
        hooks: Arc<HookPipeline>,
        store: Arc<CredentialStore>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            http,
            hooks,
            store,
            config,
        }
    }

    /// The provider's configuration.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// The credential store backing this provider.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Discovers the authorization server for the configured resource.
    pub async fn discover(&self) -> Result<AuthorizationServerMetadata> {
        discovery::discover(&self.http, &self.hooks, &self.config.server_url).await
    }

    /// Returns the known client credentials without performing network I/O.
    ///
    /// Resolution order: static configuration (highest priority), then the
    /// persisted registration. `Ok(None)` means registration is required.
    pub fn client_information(&self) -> Result<Option<ClientCredentials>> {
        if let Some(client) = self.static_client() {
            return Ok(Some(client));
        }
        Ok(self.store.load()?.and_then(|creds| creds.client_info))
    }

    /// Returns client credentials, registering a new client when none are
    /// known.
    ///
    /// Dynamic registration runs at most once per server: the response is
    /// persisted and reused on subsequent calls. Static credentials always
    /// win and are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Auth`] when no credentials exist and the
    /// server offers no registration endpoint.
    pub async fn ensure_client(
        &self,
        metadata: &AuthorizationServerMetadata,
        redirect_uri: &str,
    ) -> Result<ClientCredentials> {
        if let Some(client) = self.client_information()? {
            return Ok(client);
        }

        let Some(ref registration_endpoint) = metadata.registration_endpoint else {
            return Err(TetherError::Auth(
                "no client credentials configured and the authorization server \
                 does not support dynamic registration"
                    .to_string(),
            )
            .into());
        };

        self.register_client(registration_endpoint, redirect_uri)
            .await
    }

    /// Performs Dynamic Client Registration (RFC 7591) and persists the
    /// result.
    pub async fn register_client(
        &self,
        registration_endpoint: &str,
        redirect_uri: &str,
    ) -> Result<ClientCredentials> {
        let url = Url::parse(registration_endpoint).map_err(|e| {
            TetherError::Auth(format!(
                "invalid registration endpoint `{registration_endpoint}`: {e}"
            ))
        })?;
        let url = self.hooks.apply(url);

        let body = serde_json::json!({
            "client_name": self.config.client_name,
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        });

        let response = self
            .http
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| TetherError::Auth(format!("client registration failed: {e}")))?;

        let status = response.status();
        self.hooks.observe(&url, status.as_u16());

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TetherError::Auth(format!(
                "registration endpoint returned {status}: {text}"
            ))
            .into());
        }

        let registered: RegistrationResponse = response.json().await.map_err(|e| {
            TetherError::Auth(format!("failed to parse registration response: {e}"))
        })?;

        let client = ClientCredentials {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            redirect_uris: vec![redirect_uri.to_string()],
            extra: registered.extra,
        };
        self.store.save_client_info(&client)?;
        tracing::info!(client_id = %client.client_id, "registered OAuth client");
        Ok(client)
    }

    /// Builds the authorization endpoint URL for a browser redirect.
    pub fn authorization_url(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &ClientCredentials,
        pkce: &PkcePair,
        state: &str,
        redirect_uri: &str,
    ) -> Result<Url> {
        let mut url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            TetherError::Auth(format!("invalid authorization endpoint URL: {e}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &client.client_id);
            query.append_pair("redirect_uri", redirect_uri);
            if let Some(ref scope) = self.config.scope {
                query.append_pair("scope", scope);
            }
            query.append_pair("state", state);
            query.append_pair("code_challenge", &pkce.challenge);
            query.append_pair("code_challenge_method", "S256");
            query.append_pair("resource", self.config.server_url.as_str());
        }

        Ok(url)
    }

    /// Exchanges an authorization code (plus PKCE verifier) for tokens.
    ///
    /// The resulting token set is persisted and the stored PKCE verifier is
    /// discarded, success or failure: a consumed code cannot be exchanged
    /// again, so the verifier has no further use.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::TokenExchangeFailed`] when the endpoint
    /// rejects the exchange or the response cannot be parsed.
    pub async fn exchange_code(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &ClientCredentials,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet> {
        let resource = self.config.server_url.as_str().to_string();

        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", redirect_uri);
        params.insert("client_id", &client.client_id);
        params.insert("code_verifier", verifier);
        params.insert("resource", &resource);
        if let Some(ref secret) = client.client_secret {
            params.insert("client_secret", secret);
        }

        let result = self
            .token_request(&metadata.token_endpoint, &params, |detail| {
                TetherError::TokenExchangeFailed(detail)
            })
            .await;

        self.store.clear_pkce_verifier()?;

        let tokens = result?;
        self.save_tokens(&tokens)?;
        Ok(tokens)
    }

    /// Exchanges a refresh token for a fresh token set.
    ///
    /// When the endpoint omits a new refresh token the old one is carried
    /// over, since it remains valid per RFC 6749 section 6. The refreshed
    /// set is persisted before returning.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::TokenRefreshFailed`] on any endpoint or parse
    /// failure. Callers treat this identically to having no token at all
    /// and fall back to a full interactive authorization.
    pub async fn refresh_token(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        let resource = self.config.server_url.as_str().to_string();

        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &client.client_id);
        params.insert("resource", &resource);
        if let Some(ref secret) = client.client_secret {
            params.insert("client_secret", secret);
        }
        if let Some(ref scope) = self.config.scope {
            params.insert("scope", scope);
        }

        let mut tokens = self
            .token_request(&metadata.token_endpoint, &params, |detail| {
                TetherError::TokenRefreshFailed(detail)
            })
            .await?;

        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }

        self.save_tokens(&tokens)?;
        Ok(tokens)
    }

    /// Persists a token set to the credential store.
    pub fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
        self.store.save_tokens(tokens)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// The static client configured by the operator, if any.
    fn static_client(&self) -> Option<ClientCredentials> {
        self.config
            .static_client_id
            .as_ref()
            .map(|client_id| ClientCredentials {
                client_id: client_id.clone(),
                client_secret: self.config.static_client_secret.clone(),
                redirect_uris: Vec::new(),
                extra: HashMap::new(),
            })
    }

    /// POSTs a form to the token endpoint and parses the token response.
    ///
    /// `wrap` converts a failure description into the caller's error
    /// variant (exchange vs. refresh).
    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &HashMap<&str, &str>,
        wrap: impl Fn(String) -> TetherError,
    ) -> Result<TokenSet> {
        let url = Url::parse(token_endpoint)
            .map_err(|e| wrap(format!("invalid token endpoint `{token_endpoint}`: {e}")))?;
        let url = self.hooks.apply(url);

        let response = self
            .http
            .post(url.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| wrap(format!("token request failed: {e}")))?;

        let status = response.status();
        self.hooks.observe(&url, status.as_u16());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(wrap(format!("token endpoint returned {status}: {body}")).into());
        }

        let raw: TokenResponse = response
            .json()
            .await
            .map_err(|e| wrap(format!("failed to parse token response: {e}")))?;

        Ok(raw.into_token_set())
    }
}

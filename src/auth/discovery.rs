//! OAuth 2.1 / OIDC endpoint discovery
//!
//! Locates the authorization server for a protected MCP resource before the
//! authorization code flow runs:
//!
//! 1. Fetch the RFC 9728 protected resource metadata from the resource
//!    server's well-known URI.
//! 2. Take the first advertised authorization server (falling back to the
//!    resource server's own origin when no metadata is published).
//! 3. Fetch the authorization server metadata, trying the RFC 8414 and
//!    OpenID Connect Discovery well-known orderings.
//!
//! Every GET issued here passes through the [`HookPipeline`] so that
//! known-malformed gateway URLs (double-nested `.well-known` paths and
//! friends) can be corrected before the request leaves the process.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TetherError};
use crate::net::HookPipeline;

// ---------------------------------------------------------------------------
// Protected Resource Metadata (RFC 9728)
// ---------------------------------------------------------------------------

/// Metadata document describing a protected OAuth resource.
///
/// # Examples
///
/// ```
/// use mcp_tether::auth::discovery::ProtectedResourceMetadata;
///
/// let json = r#"{
///     "resource": "https://api.example.com",
///     "authorization_servers": ["https://auth.example.com"]
/// }"#;
/// let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.authorization_servers.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The URI of the protected resource itself.
    pub resource: String,

    /// Issuer URIs of the authorization servers protecting this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// Scopes the resource supports, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Authorization Server Metadata (RFC 8414 / OIDC Discovery)
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth 2.1 / OIDC authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier URI.
    pub issuer: String,

    /// Authorization endpoint URL (RFC 6749 section 3.1).
    pub authorization_endpoint: String,

    /// Token endpoint URL (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Dynamic Client Registration endpoint (RFC 7591), when offered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported `response_type` values.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported grant types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Supported PKCE challenge methods; must include `"S256"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Any other advertised fields, preserved for diagnostics.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Discovery entry points
// ---------------------------------------------------------------------------

/// Runs the full discovery sequence for a protected resource URL.
///
/// Failures to fetch protected-resource metadata are not fatal: many servers
/// act as their own authorization server and publish only RFC 8414 metadata
/// at their origin.
///
/// # Errors
///
/// Returns [`TetherError::Auth`] when no authorization server metadata can
/// be located at any candidate well-known URI.
pub async fn discover(
    http: &reqwest::Client,
    hooks: &Arc<HookPipeline>,
    server_url: &Url,
) -> Result<AuthorizationServerMetadata> {
    let issuer = match fetch_protected_resource_metadata(http, hooks, server_url).await {
        Ok(metadata) => match metadata.authorization_servers.first() {
            Some(issuer) => Url::parse(issuer).map_err(|e| {
                TetherError::Auth(format!("invalid authorization server URI `{issuer}`: {e}"))
            })?,
            None => origin_of(server_url)?,
        },
        Err(e) => {
            tracing::debug!(
                error = %e,
                "no protected resource metadata; assuming server is its own issuer"
            );
            origin_of(server_url)?
        }
    };

    fetch_authorization_server_metadata(http, hooks, &issuer).await
}

/// Fetches the RFC 9728 protected resource metadata for `server_url`.
pub async fn fetch_protected_resource_metadata(
    http: &reqwest::Client,
    hooks: &Arc<HookPipeline>,
    server_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    let url = well_known_url(server_url, "oauth-protected-resource")?;
    get_json(http, hooks, url).await
}

/// Fetches RFC 8414 / OIDC authorization server metadata for `issuer`.
///
/// Candidate well-known URIs are tried in order:
///
/// 1. `/.well-known/oauth-authorization-server{path}` (RFC 8414)
/// 2. `/.well-known/openid-configuration{path}` (OIDC, path-inserted)
/// 3. `{path}/.well-known/openid-configuration` (OIDC, path-appended)
pub async fn fetch_authorization_server_metadata(
    http: &reqwest::Client,
    hooks: &Arc<HookPipeline>,
    issuer: &Url,
) -> Result<AuthorizationServerMetadata> {
    let candidates = vec![
        well_known_url(issuer, "oauth-authorization-server")?,
        well_known_url(issuer, "openid-configuration")?,
        appended_well_known_url(issuer, "openid-configuration")?,
    ];

    let mut failures = Vec::new();
    for candidate in candidates {
        match get_json::<AuthorizationServerMetadata>(http, hooks, candidate.clone()).await {
            Ok(metadata) => return Ok(metadata),
            Err(e) => failures.push(format!("{candidate}: {e}")),
        }
    }

    Err(TetherError::Auth(format!(
        "authorization server metadata not found for {issuer}; tried: {}",
        failures.join("; ")
    ))
    .into())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builds a path-inserted well-known URL per RFC 8414 section 3.1:
/// `https://host/.well-known/<suffix><original-path>`.
fn well_known_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = origin_of(base)?;
    let original_path = base.path().trim_end_matches('/');
    let path = if original_path.is_empty() {
        format!("/.well-known/{suffix}")
    } else {
        format!("/.well-known/{suffix}{original_path}")
    };
    url.set_path(&path);
    Ok(url)
}

/// Builds a path-appended well-known URL (pre-RFC-8414 OIDC convention):
/// `https://host<original-path>/.well-known/<suffix>`.
fn appended_well_known_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = origin_of(base)?;
    let original_path = base.path().trim_end_matches('/');
    url.set_path(&format!("{original_path}/.well-known/{suffix}"));
    Ok(url)
}

/// Strips a URL to scheme + authority.
fn origin_of(url: &Url) -> Result<Url> {
    let mut origin = url.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    Ok(origin)
}

/// Issues a GET through the hook pipeline and parses the JSON body.
async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    hooks: &Arc<HookPipeline>,
    url: Url,
) -> Result<T> {
    let url = hooks.apply(url);

    let response = http
        .get(url.clone())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| TetherError::Auth(format!("discovery request failed: {e}")))?;

    let status = response.status();
    hooks.observe(&url, status.as_u16());

    if !status.is_success() {
        return Err(TetherError::Auth(format!("HTTP {status}")).into());
    }

    response
        .json::<T>()
        .await
        .map_err(|e| TetherError::Auth(format!("malformed discovery document: {e}")).into())
}

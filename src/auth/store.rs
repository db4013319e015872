//! File-backed credential persistence
//!
//! Each remote server gets one JSON record on disk, keyed by a stable hash
//! of its URL. The record carries the dynamic client registration, the
//! current token set, and (transiently) the PKCE verifier of an in-flight
//! authorization attempt.
//!
//! The on-disk files are one of only two resources shared between proxy
//! processes (the other being the lock file, see
//! [`lock`](crate::auth::lock)). Writes go to a temporary file in the same
//! directory followed by a rename, so a concurrent reader never observes a
//! partially written record. Reads and writes are last-writer-wins across
//! processes; each write is an internally consistent record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Result, TetherError};

/// Buffer subtracted from `expires_at` so callers have time to refresh
/// before the resource server starts rejecting the token.
const EXPIRY_BUFFER_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// OAuth client registration data, either from Dynamic Client Registration
/// or supplied statically by the operator.
///
/// Unrecognized registration-response fields are preserved in `extra` so a
/// record survives round-trips even when the gateway returns vendor
/// extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// The OAuth client identifier.
    pub client_id: String,

    /// Client secret for confidential clients. Public clients have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Redirect URIs registered with the authorization server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,

    /// Any additional registration metadata returned by the server.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A complete OAuth token set.
///
/// `expires_at` is an absolute UTC timestamp computed from the token
/// endpoint's `expires_in` seconds, stored so that expiry can be determined
/// without a server round-trip.
///
/// # Examples
///
/// ```
/// use mcp_tether::auth::store::TokenSet;
///
/// let tokens = TokenSet {
///     access_token: "tok".to_string(),
///     token_type: "Bearer".to_string(),
///     expires_at: None,
///     refresh_token: None,
///     scope: None,
/// };
/// // A token with no expiry is never considered expired.
/// assert!(!tokens.is_expired());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// UTC expiry of the access token. `None` means non-expiring.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Refresh token for obtaining a new access token without re-running
    /// the interactive flow. Absence forces a full re-authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// `true` when the access token is expired or within the refresh buffer
    /// of its expiry. Tokens without `expires_at` never expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(EXPIRY_BUFFER_SECS);
                Utc::now() >= expires_at - buffer
            }
        }
    }
}

/// The full per-server credential record as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Client registration, if one has been performed or configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientCredentials>,

    /// The current token set, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,

    /// PKCE verifier of an in-flight authorization attempt. Cleared when
    /// the code exchange completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce_verifier: Option<String>,

    /// When this record was last written. Used by waiting processes to
    /// recognize a token freshly produced by the lock holder. Stored as
    /// RFC 3339 with full precision; second-granularity timestamps would
    /// make a waiter miss a write landing in the same second its wait began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Server key
// ---------------------------------------------------------------------------

/// Derives the stable storage key for a server URL.
///
/// SHA-256 of the URL string, hex-encoded and truncated to 16 characters.
/// Deterministic across processes and sessions; two distinct server URLs
/// collide only with negligible probability.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use mcp_tether::auth::store::server_key;
///
/// let a = server_key(&Url::parse("https://api.example.com/mcp").unwrap());
/// let b = server_key(&Url::parse("https://api.example.com/mcp").unwrap());
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 16);
/// ```
pub fn server_key(server_url: &Url) -> String {
    let digest = Sha256::digest(server_url.as_str().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// File-backed credential store for one remote server.
///
/// # Examples
///
/// ```no_run
/// use url::Url;
/// use mcp_tether::auth::store::CredentialStore;
///
/// # fn main() -> anyhow::Result<()> {
/// let url = Url::parse("https://api.example.com/mcp")?;
/// let store = CredentialStore::for_server(&url)?;
/// match store.load()? {
///     Some(creds) => println!("client registered: {}", creds.client_info.is_some()),
///     None => println!("no credentials yet"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    key: String,
}

impl CredentialStore {
    /// Creates a store rooted at `dir` for the given server URL.
    ///
    /// The directory is created if missing.
    pub fn new(dir: impl Into<PathBuf>, server_url: &Url) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            TetherError::Store(format!(
                "failed to create credential directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            key: server_key(server_url),
        })
    }

    /// Creates a store in the per-user data directory
    /// (`<data_dir>/mcp-tether/credentials`).
    pub fn for_server(server_url: &Url) -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "mcp-tether").ok_or_else(|| {
            TetherError::Store("could not determine a per-user data directory".to_string())
        })?;
        Self::new(dirs.data_dir().join("credentials"), server_url)
    }

    /// The storage key derived from the server URL.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the credential record file.
    pub fn record_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.key))
    }

    /// Path of the advisory lock file guarding interactive authorization
    /// for this server.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.key))
    }

    /// Loads the stored record.
    ///
    /// Returns `Ok(None)` when no record exists, so callers can distinguish
    /// "not authenticated yet" from a genuine I/O error.
    pub fn load(&self) -> Result<Option<StoredCredentials>> {
        let path = self.record_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TetherError::Store(format!(
                    "failed to read {}: {e}",
                    path.display()
                ))
                .into())
            }
        };
        let creds: StoredCredentials = serde_json::from_str(&raw)?;
        Ok(Some(creds))
    }

    /// Persists the full record, stamping `updated_at` with the current
    /// time.
    ///
    /// The write is atomic with respect to concurrent readers: the record is
    /// written to a temporary file in the same directory and renamed into
    /// place.
    pub fn save(&self, creds: &StoredCredentials) -> Result<()> {
        let mut stamped = creds.clone();
        stamped.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&stamped)?;

        let path = self.record_path();
        let tmp = self
            .dir
            .join(format!("{}.json.tmp-{}", self.key, std::process::id()));
        std::fs::write(&tmp, json).map_err(|e| {
            TetherError::Store(format!("failed to write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            TetherError::Store(format!("failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }

    /// Read-modify-writes the token set into the record.
    pub fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
        let mut creds = self.load()?.unwrap_or_default();
        creds.tokens = Some(tokens.clone());
        self.save(&creds)
    }

    /// Read-modify-writes the client registration into the record.
    pub fn save_client_info(&self, client_info: &ClientCredentials) -> Result<()> {
        let mut creds = self.load()?.unwrap_or_default();
        creds.client_info = Some(client_info.clone());
        self.save(&creds)
    }

    /// Stores the PKCE verifier of an in-flight authorization attempt.
    pub fn save_pkce_verifier(&self, verifier: &str) -> Result<()> {
        let mut creds = self.load()?.unwrap_or_default();
        creds.pkce_verifier = Some(verifier.to_string());
        self.save(&creds)
    }

    /// Discards the PKCE verifier after the code exchange concludes.
    pub fn clear_pkce_verifier(&self) -> Result<()> {
        let mut creds = self.load()?.unwrap_or_default();
        if creds.pkce_verifier.take().is_some() {
            self.save(&creds)?;
        }
        Ok(())
    }

    /// Deletes the record entirely. No-op when nothing is stored.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(self.record_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TetherError::Store(format!("failed to clear record: {e}")).into()),
        }
    }

    /// Returns tokens written after `since`, if any.
    ///
    /// Used by processes waiting on the authorization lock to pick up the
    /// token set produced by the lock holder without running a redundant
    /// interactive flow. Expired tokens are never returned.
    pub fn tokens_written_since(&self, since: DateTime<Utc>) -> Result<Option<TokenSet>> {
        let Some(creds) = self.load()? else {
            return Ok(None);
        };
        let fresh = creds
            .updated_at
            .map_or(false, |updated_at| updated_at >= since);
        match creds.tokens {
            Some(tokens) if fresh && !tokens.is_expired() => Ok(Some(tokens)),
            _ => Ok(None),
        }
    }

    /// The directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

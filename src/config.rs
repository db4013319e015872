//! Configuration management for mcp-tether
//!
//! This module handles loading, parsing, validating, and merging
//! configuration from a YAML file, environment variables, and CLI
//! overrides. Precedence, lowest to highest: built-in defaults, config
//! file, CLI/environment flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::Cli;
use crate::connect::TransportStrategy;
use crate::error::{Result, TetherError};

/// Main configuration structure for the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The remote server URL. Required; normally supplied on the CLI.
    #[serde(default)]
    pub server_url: Option<Url>,

    /// Transport selection strategy.
    #[serde(default)]
    pub transport: ConfiguredStrategy,

    /// OAuth client settings.
    #[serde(default)]
    pub oauth: OAuthSettings,

    /// Timeouts and retry pacing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Directory for credential and lock files. `None` uses the per-user
    /// data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Newtype wrapper so a missing `transport:` key deserializes to the
/// default strategy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfiguredStrategy(pub TransportStrategy);

/// OAuth client settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// Pre-registered client ID; takes precedence over dynamic
    /// registration and is never overwritten by it.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret for confidential clients.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Scope string to request.
    #[serde(default)]
    pub scope: Option<String>,

    /// Fixed local port for the redirect listener; `0` = ephemeral.
    #[serde(default)]
    pub callback_port: u16,

    /// Whether to launch the system browser for authorization.
    #[serde(default = "default_true")]
    pub open_browser: bool,
}

/// Timeouts and retry pacing, all in seconds or milliseconds as named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Per-request timeout for remote transport HTTP calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long to wait for the OAuth redirect once a browser is open.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,

    /// Budget for waiting on another process's authorization flow.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_secs: u64,

    /// Pause between lock acquisition attempts.
    #[serde(default = "default_lock_retry")]
    pub lock_retry_ms: u64,

    /// Age beyond which a held authorization lock is reclaimed.
    #[serde(default = "default_lock_stale")]
    pub lock_stale_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_callback_timeout() -> u64 {
    300
}

fn default_lock_wait() -> u64 {
    120
}

fn default_lock_retry() -> u64 {
    500
}

fn default_lock_stale() -> u64 {
    600
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            callback_timeout_secs: default_callback_timeout(),
            lock_wait_secs: default_lock_wait(),
            lock_retry_ms: default_lock_retry(),
            lock_stale_secs: default_lock_stale(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            transport: ConfiguredStrategy::default(),
            oauth: OAuthSettings {
                client_id: None,
                client_secret: None,
                scope: None,
                callback_port: 0,
                open_browser: true,
            },
            timing: TimingConfig::default(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Loads configuration: YAML file (when present) merged with CLI and
    /// environment overrides.
    ///
    /// A missing config file is not an error unless the user named one
    /// explicitly on the CLI.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match cli.config {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.server_url = Some(cli.server_url.clone());

        if let Some(ref transport) = cli.transport {
            config.transport = ConfiguredStrategy(transport.parse()?);
        }
        if let Some(port) = cli.callback_port {
            config.oauth.callback_port = port;
        }
        if let Some(ref client_id) = cli.client_id {
            config.oauth.client_id = Some(client_id.clone());
        }
        if let Some(ref client_secret) = cli.client_secret {
            config.oauth.client_secret = Some(client_secret.clone());
        }
        if let Some(ref scope) = cli.scope {
            config.oauth.scope = Some(scope.clone());
        }
        if cli.no_browser {
            config.oauth.open_browser = false;
        }
        if let Some(ref data_dir) = cli.data_dir {
            config.data_dir = Some(data_dir.clone());
        }

        Ok(config)
    }

    /// Parses a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let Some(ref server_url) = self.server_url else {
            return Err(TetherError::Config("server URL is required".to_string()).into());
        };
        match server_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TetherError::Config(format!(
                    "server URL must be http or https, got `{other}`"
                ))
                .into())
            }
        }

        if self.oauth.client_secret.is_some() && self.oauth.client_id.is_none() {
            return Err(TetherError::Config(
                "oauth.client_secret requires oauth.client_id".to_string(),
            )
            .into());
        }

        if self.timing.lock_stale_secs <= self.timing.callback_timeout_secs {
            return Err(TetherError::Config(
                "timing.lock_stale_secs must exceed timing.callback_timeout_secs; \
                 otherwise a legitimate interactive flow gets its lock reclaimed"
                    .to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// The effective transport strategy.
    pub fn strategy(&self) -> TransportStrategy {
        self.transport.0
    }

    /// Per-request timeout as a [`std::time::Duration`].
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timing.request_timeout_secs)
    }
}

//! mcp-tether - stdio-to-remote MCP proxy
//!
//! Main entry point: parse the CLI, assemble the authorization stack, open
//! the remote transport (authorizing lazily if the server demands it), and
//! bridge it to stdin/stdout until either side closes.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_tether::auth::coordinator::{AuthCoordinator, CoordinatorConfig};
use mcp_tether::auth::provider::{OAuthConfig, OAuthProvider};
use mcp_tether::auth::store::CredentialStore;
use mcp_tether::cli::Cli;
use mcp_tether::config::Config;
use mcp_tether::connect::ConnectionManager;
use mcp_tether::net::HookPipeline;
use mcp_tether::proxy::bridge;
use mcp_tether::transport::stdio::StdioTransport;
use mcp_tether::transport::Transport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config = Config::load(&cli)?;
    config.validate()?;

    let server_url = config
        .server_url
        .clone()
        .expect("validated config has a server URL");

    // Shared plumbing: one HTTP client for all auth traffic, the standard
    // hook pipeline (the opt-out env var is honored inside standard()), and
    // the per-server credential store.
    let http = Arc::new(reqwest::Client::new());
    let hooks = Arc::new(HookPipeline::standard());
    let store = Arc::new(match config.data_dir {
        Some(ref dir) => CredentialStore::new(dir, &server_url)?,
        None => CredentialStore::for_server(&server_url)?,
    });

    let provider = Arc::new(OAuthProvider::new(
        Arc::clone(&http),
        Arc::clone(&hooks),
        Arc::clone(&store),
        OAuthConfig {
            server_url: server_url.clone(),
            client_name: "mcp-tether".to_string(),
            scope: config.oauth.scope.clone(),
            static_client_id: config.oauth.client_id.clone(),
            static_client_secret: config.oauth.client_secret.clone(),
        },
    ));

    let coordinator = AuthCoordinator::new(
        provider,
        CoordinatorConfig {
            lock_wait: std::time::Duration::from_secs(config.timing.lock_wait_secs),
            lock_retry_interval: std::time::Duration::from_millis(config.timing.lock_retry_ms),
            lock_stale_after: std::time::Duration::from_secs(config.timing.lock_stale_secs),
            callback_timeout: std::time::Duration::from_secs(
                config.timing.callback_timeout_secs,
            ),
            callback_port: config.oauth.callback_port,
            open_browser: config.oauth.open_browser,
        },
    );

    let manager = ConnectionManager::new(
        server_url.clone(),
        config.strategy(),
        config.request_timeout(),
        Arc::clone(&store),
    );

    tracing::info!(server = %server_url, strategy = %config.strategy(), "connecting");
    let remote = manager
        .connect(|| coordinator.ensure_authorized())
        .await?;

    let local: Box<dyn Transport> = Box::new(StdioTransport::attach());
    bridge(local, remote).await?;

    // tokio's stdin reader is a blocking read that cannot be cancelled;
    // when the remote side initiated the close, dropping the runtime would
    // wait on it until the parent writes another line. Exit directly.
    std::process::exit(0)
}

/// Initializes tracing to stderr.
///
/// stdout belongs to the protocol stream; nothing else may write to it.
/// `RUST_LOG` overrides the verbosity flag when set.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mcp_tether={default_level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

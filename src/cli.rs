//! Command-line interface definition for mcp-tether
//!
//! This module defines the CLI structure using clap's derive API. The proxy
//! is single-purpose, so there are no subcommands: one remote server URL,
//! plus overrides for the options in [`Config`](crate::config::Config).

use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// mcp-tether - stdio-to-remote MCP proxy with OAuth coordination
///
/// Bridges a local MCP client speaking stdio to a remote MCP server that
/// requires OAuth 2.1 authorization, handling authentication, transport
/// selection, and retry transparently to both sides.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// URL of the remote MCP server to proxy to
    pub server_url: Url,

    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Transport strategy: http-first, sse-first, http-only, or sse-only
    #[arg(short, long, env = "MCP_TETHER_TRANSPORT")]
    pub transport: Option<String>,

    /// Fixed local port for the OAuth redirect listener (0 = ephemeral)
    #[arg(long, env = "MCP_TETHER_CALLBACK_PORT")]
    pub callback_port: Option<u16>,

    /// Pre-registered OAuth client ID, bypassing dynamic registration
    #[arg(long, env = "MCP_TETHER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Client secret paired with --client-id
    #[arg(long, env = "MCP_TETHER_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// OAuth scope string to request
    #[arg(long, env = "MCP_TETHER_SCOPE")]
    pub scope: Option<String>,

    /// Do not launch a browser; only print the authorization URL
    #[arg(long)]
    pub no_browser: bool,

    /// Directory for credential and lock files (defaults to the per-user
    /// data directory)
    #[arg(long, env = "MCP_TETHER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parses the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

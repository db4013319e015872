//! mcp-tether - stdio-to-remote MCP proxy library
//!
//! This library bridges a local MCP client that can only speak the stdio
//! message-stream protocol to a remote MCP server that requires OAuth 2.1
//! authorization and speaks an HTTP-based streaming transport.
//!
//! # Architecture
//!
//! - `auth`: authorization coordination -- PKCE flow, endpoint discovery,
//!   credential storage, the cross-process lock, and the coordinator that
//!   guarantees at most one interactive authorization per server at a time
//! - `connect`: remote transport establishment with kind fallback and lazy
//!   authorization
//! - `proxy`: the bidirectional message bridge
//! - `transport`: the `Transport` trait and stdio / Streamable HTTP / SSE
//!   implementations
//! - `protocol`: the JSON-RPC message envelope and initialize tagging
//! - `net`: the request-rewrite/response-observe hook pipeline
//! - `config`, `cli`, `error`: the usual suspects
//!
//! # Example
//!
//! ```no_run
//! use mcp_tether::{Cli, Config};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cli = Cli::parse_args();
//! let config = Config::load(&cli)?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod connect;
pub mod error;
pub mod net;
pub mod protocol;
pub mod proxy;
pub mod transport;

// Re-export commonly used types
pub use cli::Cli;
pub use config::Config;
pub use connect::{ConnectionManager, TransportStrategy};
pub use error::{Result, TetherError};
pub use proxy::bridge;

//! OAuth 2.1 authorization coordination
//!
//! Everything required to turn "the remote server said 401" into a valid
//! token set, safely, when several local proxy processes may be racing to
//! authenticate against the same server.
//!
//! # Module Layout
//!
//! - [`pkce`]        -- PKCE `S256` pair generation and verification
//! - [`discovery`]   -- RFC 9728 protected resource metadata and RFC 8414 /
//!   OIDC authorization server discovery
//! - [`store`]       -- file-backed credential persistence, keyed per server
//! - [`lock`]        -- cross-process advisory lock with stale-holder reclaim
//! - [`callback`]    -- one-shot local HTTP listener for the OAuth redirect
//! - [`provider`]    -- authorization code flow primitives (registration,
//!   authorization URL, code exchange, refresh)
//! - [`coordinator`] -- the orchestrator guaranteeing at most one interactive
//!   authorization per server across all local processes

pub mod callback;
pub mod coordinator;
pub mod discovery;
pub mod lock;
pub mod pkce;
pub mod provider;
pub mod store;

//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait both ends of the bridge
//! satisfy. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- the local side: this process's own
//!   stdin/stdout, newline-delimited JSON, one message per line.
//! - [`streamable::StreamableTransport`] -- Streamable HTTP remote
//!   transport (POST per message; JSON, SSE, or 202 responses).
//! - [`sse::SseTransport`] -- legacy HTTP+SSE remote transport (long-lived
//!   GET event stream; messages POSTed to the URL announced by the server's
//!   `endpoint` event).
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Design
//!
//! The trait is intentionally minimal: callers `send` a serialized JSON-RPC
//! string and `receive` a stream of serialized JSON-RPC strings. Framing is
//! each implementation's responsibility. `receive_err` carries transport
//! diagnostics that must not be treated as errors. A transport's `receive`
//! stream ending is the close signal; `close` forces that from the caller's
//! side and is idempotent.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// The wire-level mechanism used to reach a peer.
///
/// The remote kinds participate in the connection manager's fallback logic;
/// [`TransportKind::Stdio`] identifies the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// This process's stdin/stdout.
    Stdio,
    /// Streamable HTTP (POST per message).
    Streamable,
    /// Legacy HTTP+SSE (GET event stream + POST endpoint).
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Streamable => write!(f, "streamable-http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Abstraction over the proxy's duplex message channels.
///
/// All methods are `async` or return pinned [`Stream`]s so implementations
/// can drive I/O without blocking the Tokio executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establishes the connection, surfacing authorization and protocol
    /// failures before any message flows.
    ///
    /// The default implementation is a no-op for transports that have
    /// nothing to set up (stdio is connected by construction).
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Sends a complete serialized JSON-RPC message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TetherError::TransportClosed`] when the
    /// transport has terminated, or
    /// [`crate::error::TetherError::Transport`] for other I/O failures.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns the stream of inbound serialized JSON-RPC messages.
    ///
    /// One item per logical message, delivered in arrival order. The stream
    /// ends when the peer disconnects or [`close`](Self::close) is called.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// Diagnostic output is logged by the bridge and MUST NOT be treated as
    /// an error condition.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// The transport kind identifier used by fallback logic.
    fn kind(&self) -> TransportKind;

    /// Terminates the transport: in-flight background tasks stop and the
    /// `receive` stream ends. Idempotent.
    async fn close(&self);
}

/// Adapts a shared channel receiver into a cancellable message stream.
///
/// The stream yields until the channel is closed and drained, or until
/// `cancel` fires, whichever comes first. Every transport implementation
/// uses this for its `receive`/`receive_err` streams.
pub(crate) fn channel_stream(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(
        (rx, cancel),
        |(rx, cancel)| async move {
            let item = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    item = guard.recv() => item,
                }
            };
            item.map(|item| (item, (rx, cancel)))
        },
    ))
}

pub(crate) mod events;
pub mod sse;
pub mod stdio;
pub mod streamable;

#[cfg(test)]
pub mod fake;

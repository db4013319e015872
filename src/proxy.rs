//! Bidirectional message bridge
//!
//! Once both sides are connected, [`bridge`] forwards messages symmetrically
//! between the local and remote transports until either side terminates.
//!
//! Guarantees and behavior:
//!
//! - Messages within one direction are delivered in the order received. No
//!   ordering is claimed *between* the two directions.
//! - Exactly one message -- the local side's `initialize` request -- is
//!   augmented with proxy identity metadata before forwarding (see
//!   [`protocol::tag_initialize`](crate::protocol::tag_initialize)). All
//!   other messages pass through verbatim, including ones that do not parse
//!   as JSON.
//! - A close on either side triggers an orderly close of the other
//!   (propagate-then-stop) and the bridge concludes.
//! - An error delivering a single message is logged as a forwarding error
//!   and the bridge continues; only a transport reporting closure ends it.

use futures::StreamExt;

use crate::error::{Result, TetherError};
use crate::protocol::{tag_initialize, Message};
use crate::transport::Transport;

/// Which way a pump is moving messages. Local-to-remote additionally owns
/// the `initialize` tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "local->remote"),
            Direction::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}

/// Forwards messages between `local` and `remote` until either side
/// terminates; returns once both transports are closed.
///
/// # Examples
///
/// ```no_run
/// use mcp_tether::proxy::bridge;
/// use mcp_tether::transport::stdio::StdioTransport;
/// # use mcp_tether::transport::Transport;
///
/// # async fn example(remote: Box<dyn Transport>) -> anyhow::Result<()> {
/// let local: Box<dyn Transport> = Box::new(StdioTransport::attach());
/// bridge(local, remote).await?;
/// # Ok(())
/// # }
/// ```
pub async fn bridge(local: Box<dyn Transport>, remote: Box<dyn Transport>) -> Result<()> {
    let local = &*local;
    let remote = &*remote;

    let local_to_remote = pump(local, remote, Direction::LocalToRemote);
    let remote_to_local = pump(remote, local, Direction::RemoteToLocal);

    let local_diagnostics = async {
        let mut stream = local.receive_err();
        while let Some(line) = stream.next().await {
            tracing::debug!(side = "local", "{line}");
        }
    };
    let remote_diagnostics = async {
        let mut stream = remote.receive_err();
        while let Some(line) = stream.next().await {
            tracing::debug!(side = "remote", "{line}");
        }
    };

    tokio::join!(
        local_to_remote,
        remote_to_local,
        local_diagnostics,
        remote_diagnostics
    );

    tracing::info!("bridge concluded");
    Ok(())
}

/// Moves messages from `from` to `to` until `from`'s stream ends or `to`
/// reports closure, then closes both sides (idempotent).
async fn pump(from: &dyn Transport, to: &dyn Transport, direction: Direction) {
    let mut inbound = from.receive();
    // Armed until the local initialize request has been tagged.
    let mut tag_pending = direction == Direction::LocalToRemote;

    while let Some(raw) = inbound.next().await {
        let outgoing = if tag_pending {
            match augment_if_initialize(&raw) {
                Some(tagged) => {
                    tag_pending = false;
                    tagged
                }
                None => raw,
            }
        } else {
            raw
        };

        if let Err(e) = to.send(outgoing).await {
            if matches!(
                e.downcast_ref::<TetherError>(),
                Some(TetherError::TransportClosed(_))
            ) {
                tracing::info!(direction = %direction, "peer transport closed");
                break;
            }
            let forwarding = TetherError::Forwarding(e.to_string());
            tracing::warn!(
                direction = %direction,
                error = %forwarding,
                "message not delivered; bridge continues"
            );
        }
    }

    // Whichever way this direction ended, bridging is over: propagate the
    // close to both sides so the opposite pump unblocks.
    to.close().await;
    from.close().await;
}

/// When `raw` parses as an `initialize` request, returns it re-serialized
/// with proxy identity metadata attached. Returns `None` for everything
/// else, including unparseable payloads, which are forwarded verbatim.
fn augment_if_initialize(raw: &str) -> Option<String> {
    let mut message: Message = serde_json::from_str(raw).ok()?;
    if !message.is_initialize() {
        return None;
    }
    tag_initialize(&mut message);
    match serde_json::to_string(&message) {
        Ok(serialized) => Some(serialized),
        Err(e) => {
            tracing::warn!(error = %e, "failed to re-serialize initialize message");
            None
        }
    }
}

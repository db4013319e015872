//! In-process fake transport for bridge and connection tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the code under test; from the test side,
//! the handle:
//!
//! - reads what the code sent: `handle.outbound_rx.recv().await`
//! - injects peer messages: `handle.inbound_tx.send(json_string)`
//! - observes closure: `handle.is_closed()` / `handle.closed().await`
//!
//! Dropping `handle.inbound_tx` simulates the peer disconnecting: the
//! transport's `receive` stream ends after draining.
//!
//! ```text
//! code send() ------> outbound_tx ----> outbound_rx (handle reads)
//! handle inbound_tx -> inbound channel -> receive()  (code reads)
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TetherError};
use crate::transport::{channel_stream, Transport, TransportKind};

/// In-process fake implementing the full [`Transport`] trait over memory
/// channels.
#[derive(Debug)]
pub struct FakeTransport {
    kind: TransportKind,
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
    closed_tx: watch::Sender<bool>,
    /// Number of upcoming `send` calls that fail with a non-closure
    /// transport error. Lets tests exercise forwarding-error recovery.
    fail_sends: Arc<std::sync::atomic::AtomicUsize>,
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the code under test sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends peer messages into the transport's [`Transport::receive`]
    /// stream. Drop it to simulate the peer disconnecting.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    closed_rx: watch::Receiver<bool>,
}

impl FakeTransportHandle {
    /// `true` once [`Transport::close`] has been called on the transport.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves when the transport is closed.
    pub async fn closed(&mut self) {
        // wait_for returns an error only when the sender is dropped, which
        // also means the transport is gone.
        let _ = self.closed_rx.wait_for(|closed| *closed).await;
    }
}

impl FakeTransport {
    /// Creates a fake pair reporting [`TransportKind::Streamable`].
    pub fn new() -> (Self, FakeTransportHandle) {
        Self::with_kind(TransportKind::Streamable)
    }

    /// Makes the next `n` calls to `send` fail with a non-closure
    /// [`TetherError::Transport`] error.
    pub fn inject_send_failures(&self, n: usize) {
        self.fail_sends
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Creates a fake pair reporting the given kind.
    pub fn with_kind(kind: TransportKind) -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = watch::channel(false);

        let transport = Self {
            kind,
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            cancel: CancellationToken::new(),
            closed_tx,
            fail_sends: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closed_rx,
        };

        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TetherError::TransportClosed("fake transport closed".into()).into());
        }

        let remaining = self.fail_sends.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_sends
                .store(remaining - 1, std::sync::atomic::Ordering::SeqCst);
            return Err(TetherError::Transport("injected send failure".into()).into());
        }

        self.outbound_tx.send(message).map_err(|_| {
            TetherError::TransportClosed("fake transport handle dropped".into()).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.inbound_rx), self.cancel.clone())
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn close(&self) {
        self.cancel.cancel();
        let _ = self.closed_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_delivers_to_handle() {
        let (transport, mut handle) = FakeTransport::new();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let sent = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(sent, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_receive_yields_injected_messages_in_order() {
        let (transport, handle) = FakeTransport::new();

        for i in 0u32..3 {
            handle.inbound_tx.send(format!("msg-{i}")).unwrap();
        }

        let mut stream = transport.receive();
        for i in 0u32..3 {
            let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("timed out")
                .expect("stream ended");
            assert_eq!(message, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn test_receive_ends_when_inbound_tx_dropped() {
        let (transport, handle) = FakeTransport::new();
        let FakeTransportHandle { inbound_tx, .. } = handle;
        drop(inbound_tx);

        let mut stream = transport.receive();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_observable_on_handle() {
        let (transport, mut handle) = FakeTransport::new();
        assert!(!handle.is_closed());

        transport.close().await;

        handle.closed().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_is_error() {
        let (transport, _handle) = FakeTransport::new();
        transport.close().await;

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TetherError>(),
            Some(TetherError::TransportClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_fails_when_handle_dropped() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);

        let result = transport.send("test".to_string()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_with_kind_reports_kind() {
        let (transport, _handle) = FakeTransport::with_kind(TransportKind::Sse);
        assert_eq!(transport.kind(), TransportKind::Sse);
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }
}

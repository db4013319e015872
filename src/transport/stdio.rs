//! Local stdio transport
//!
//! The proxy is spawned by an MCP client (an editor, a desktop app) that
//! speaks newline-delimited JSON over the child's pipes. This transport is
//! therefore the inverse of a client-side stdio transport: it reads
//! messages from *this process's* stdin and writes them to *this process's*
//! stdout.
//!
//! EOF on stdin is the local close signal: the inbound channel sender is
//! dropped and the `receive` stream ends after draining. Nothing but
//! protocol messages may be written to stdout; all diagnostics go to
//! `tracing` (which the binary routes to stderr).
//!
//! [`StdioTransport::from_streams`] accepts any `AsyncRead`/`AsyncWrite`
//! pair, so the newline framing and close behavior are exercised in tests
//! over in-memory pipes; [`StdioTransport::attach`] wires up the real
//! process streams.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TetherError};
use crate::transport::{channel_stream, Transport, TransportKind};

/// Transport over this process's own stdin/stdout.
///
/// # Examples
///
/// ```no_run
/// use mcp_tether::transport::stdio::StdioTransport;
/// use mcp_tether::transport::Transport;
///
/// # async fn example() -> anyhow::Result<()> {
/// let local = StdioTransport::attach();
/// local.send(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Queue of lines destined for the output stream.
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver of lines read from the input stream.
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Stops the reader and writer tasks.
    cancel: CancellationToken,
}

impl StdioTransport {
    /// Attaches to the process's stdin/stdout.
    ///
    /// Note that tokio implements stdin as a blocking read on a background
    /// thread that cannot be cancelled; the binary accounts for this by
    /// exiting the process once the bridge concludes.
    pub fn attach() -> Self {
        Self::from_streams(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Builds the transport over an arbitrary read/write pair.
    ///
    /// Two background tasks run until EOF, I/O failure, or `close`: a
    /// reader splitting the input into lines, and a writer appending `\n`
    /// to each outbound message and flushing.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        // Writer: outbound_rx -> output stream.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut writer = writer;
            loop {
                let message = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let line = format!("{message}\n");
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader: input stream -> inbound_tx. Dropping inbound_tx at EOF
        // ends the receive stream once drained.
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                let line = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            tracing::debug!("local input reached EOF; local side closed");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "local input read failed; local side closed");
                            break;
                        }
                    },
                };
                if line.trim().is_empty() {
                    continue;
                }
                if inbound_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            cancel,
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Queues a message for the output stream. The writer task appends the
    /// newline.
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx.send(message).map_err(|_| {
            TetherError::TransportClosed("stdio writer has terminated".to_string()).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.inbound_rx), self.cancel.clone())
    }

    /// The local side has no diagnostic channel.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Builds a transport over in-memory pipes. Returns the transport plus
    /// the peer ends: write into `peer_out` to feed the transport's input,
    /// read from `peer_in` to observe its output.
    fn piped_transport() -> (
        StdioTransport,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        tokio::io::ReadHalf<tokio::io::DuplexStream>,
    ) {
        let (transport_side, peer_side) = tokio::io::duplex(4096);
        let (transport_read, transport_write) = tokio::io::split(transport_side);
        let (peer_read, peer_write) = tokio::io::split(peer_side);

        let transport = StdioTransport::from_streams(transport_read, transport_write);
        (transport, peer_write, peer_read)
    }

    #[tokio::test]
    async fn test_incoming_lines_arrive_in_order() {
        let (transport, mut peer_write, _peer_read) = piped_transport();

        peer_write
            .write_all(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n")
            .await
            .unwrap();

        let mut stream = transport.receive();
        for i in 1..=3 {
            let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("timed out")
                .expect("stream ended");
            assert_eq!(message, format!("{{\"id\":{i}}}"));
        }
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let (transport, mut peer_write, _peer_read) = piped_transport();

        peer_write
            .write_all(b"\n   \n{\"id\":1}\n")
            .await
            .unwrap();

        let mut stream = transport.receive();
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended");
        assert_eq!(message, "{\"id\":1}");
    }

    #[tokio::test]
    async fn test_send_appends_newline_framing() {
        let (transport, _peer_write, peer_read) = piped_transport();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let mut lines = BufReader::new(peer_read).lines();
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("timed out")
            .unwrap()
            .expect("line written");
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_peer_eof_ends_receive_stream() {
        let (transport, peer_write, peer_read) = piped_transport();

        // Drop both peer halves so the in-memory duplex signals EOF; holding
        // the read half alive keeps the peer end open and no EOF is delivered.
        drop(peer_write);
        drop(peer_read);

        let mut stream = transport.receive();
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("receive stream must end promptly after EOF");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_buffered_messages_drain_before_eof() {
        let (transport, mut peer_write, peer_read) = piped_transport();

        peer_write.write_all(b"{\"id\":1}\n").await.unwrap();
        // Give the reader task a beat to buffer the line, then hang up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Drop both peer halves so the in-memory duplex signals EOF.
        drop(peer_write);
        drop(peer_read);

        let mut stream = transport.receive();
        let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out");
        assert_eq!(first.as_deref(), Some("{\"id\":1}"));
        let second = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_receive_ends_after_close() {
        let (transport, _peer_write, _peer_read) = piped_transport();
        transport.close().await;

        let mut stream = transport.receive();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("receive stream must end promptly after close");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, _peer_write, _peer_read) = piped_transport();
        transport.close().await;
        transport.close().await;
    }

    #[tokio::test]
    async fn test_kind_is_stdio() {
        let (transport, _peer_write, _peer_read) = piped_transport();
        assert_eq!(transport.kind(), TransportKind::Stdio);
    }
}

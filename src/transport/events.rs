//! Server-Sent Events stream scanning
//!
//! Shared by the [`streamable`](crate::transport::streamable) and
//! [`sse`](crate::transport::sse) transports: both receive SSE bodies from
//! `reqwest` as byte-chunk streams and need them cut into events. The
//! transports differ only in what they do with each event, so the scanner
//! takes a callback.

use bytes::Bytes;
use futures::Stream;

/// One parsed SSE event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// The `event:` field, when present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, when present. Callers track it for `Last-Event-ID`
    /// stream resumption.
    pub id: Option<String>,
}

impl SseEvent {
    /// Keep-alive events are discarded silently: either `event: ping` or a
    /// bare `[PING]` data payload.
    pub fn is_ping(&self) -> bool {
        if let Some(ref event) = self.event {
            if event.eq_ignore_ascii_case("ping") {
                return true;
            }
        }
        self.data.eq_ignore_ascii_case("[ping]")
    }
}

/// Consumes an SSE byte stream, invoking `on_event` for each complete
/// event block.
///
/// Runs until the stream ends or errors; intended to be driven inside a
/// `tokio::spawn` with external cancellation. Events are separated by blank
/// lines; both `\n\n` and `\r\n\r\n` separators are accepted. A trailing
/// partial event at stream end is flushed.
pub(crate) async fn scan_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    mut on_event: impl FnMut(SseEvent),
) {
    use futures::StreamExt;

    let mut buffer = String::new();
    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(_) => break,
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(text) => text,
            Err(_) => continue,
        };
        buffer.push_str(text);

        while let Some((end, sep_len)) = find_event_boundary(&buffer) {
            let block = buffer[..end].to_string();
            buffer.drain(..end + sep_len);
            if let Some(event) = parse_event_block(&block) {
                on_event(event);
            }
        }
    }

    if !buffer.is_empty() {
        if let Some(event) = parse_event_block(&buffer) {
            on_event(event);
        }
    }
}

/// Finds the first blank-line separator in `buffer`.
///
/// Returns `(index_of_separator, separator_length)`.
fn find_event_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|i| (i, 2));
    let crlf = buffer.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Parses one event block into an [`SseEvent`].
///
/// Returns `None` for blocks carrying neither data nor an event type
/// (comment-only blocks).
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<String> = None;
    let mut event_id: Option<String> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            event_id = Some(value.trim().to_string());
        }
        // `retry:` is parsed and ignored (reconnect timing is the caller's
        // concern); lines starting with `:` are SSE comments.
    }

    if data_lines.is_empty() && event_type.is_none() && event_id.is_none() {
        return None;
    }

    Some(SseEvent {
        event: event_type,
        data: data_lines.join("\n"),
        id: event_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scan_collect(body: &'static [u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let chunk: reqwest::Result<Bytes> = Ok(Bytes::from_static(body));
        let byte_stream = futures::stream::iter(vec![chunk]);
        scan_sse_stream(byte_stream, |event| events.push(event)).await;
        events
    }

    #[tokio::test]
    async fn test_single_data_event() {
        let events = scan_collect(b"data: {\"jsonrpc\":\"2.0\"}\n\n").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"jsonrpc":"2.0"}"#);
    }

    #[tokio::test]
    async fn test_two_events_in_order() {
        let events = scan_collect(b"data: first\n\ndata: second\n\n").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert_eq!(events[1].data, "second");
    }

    #[tokio::test]
    async fn test_crlf_separators_accepted() {
        let events = scan_collect(b"data: first\r\n\r\ndata: second\r\n\r\n").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert_eq!(events[1].data, "second");
    }

    #[tokio::test]
    async fn test_event_type_and_id_captured() {
        let events = scan_collect(b"event: endpoint\nid: evt-1\ndata: /message\n\n").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].id.as_deref(), Some("evt-1"));
        assert_eq!(events[0].data, "/message");
    }

    #[tokio::test]
    async fn test_multiline_data_joined() {
        let events = scan_collect(b"data: line1\ndata: line2\n\n").await;
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[tokio::test]
    async fn test_comment_only_block_skipped() {
        let events = scan_collect(b": keepalive\n\ndata: real\n\n").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[tokio::test]
    async fn test_trailing_partial_event_flushed() {
        // No trailing blank line; the final event must still be delivered.
        let events = scan_collect(b"data: only\n").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "only");
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let mut events = Vec::new();
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: par")),
            Ok(Bytes::from_static(b"tial\n\n")),
        ];
        let byte_stream = futures::stream::iter(chunks);
        scan_sse_stream(byte_stream, |event| events.push(event)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_ping_by_event_type() {
        let event = SseEvent {
            event: Some("ping".to_string()),
            data: "ignored".to_string(),
            id: None,
        };
        assert!(event.is_ping());
    }

    #[test]
    fn test_ping_by_data_payload() {
        let event = SseEvent {
            event: None,
            data: "[PING]".to_string(),
            id: None,
        };
        assert!(event.is_ping());
    }

    #[test]
    fn test_regular_event_is_not_ping() {
        let event = SseEvent {
            event: None,
            data: r#"{"jsonrpc":"2.0"}"#.to_string(),
            id: None,
        };
        assert!(!event.is_ping());
    }
}

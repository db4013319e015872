//! JSON-RPC 2.0 message envelope for the bridge
//!
//! The proxy forwards messages without interpreting their method semantics.
//! The single exception is the local side's `initialize` request, which is
//! augmented with proxy identity metadata before forwarding so that the
//! remote server can distinguish proxied clients.
//!
//! [`Message`] is deliberately loose: every field except `jsonrpc` is
//! optional, and unknown fields are preserved in `extra` so that a message
//! survives a parse/serialize round-trip byte-for-byte in content (key order
//! aside).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// JSON-RPC method name of the MCP session handshake request.
pub const METHOD_INITIALIZE: &str = "initialize";

/// Proxy name advertised in the augmented `initialize` message.
pub const PROXY_NAME: &str = env!("CARGO_PKG_NAME");

/// Proxy version advertised in the augmented `initialize` message.
pub const PROXY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A JSON-RPC 2.0 message envelope.
///
/// Covers requests (`id` + `method`), notifications (`method`, no `id`),
/// and responses (`id` + `result` or `error`) in a single type, because the
/// bridge treats all three uniformly.
///
/// # Examples
///
/// ```
/// use mcp_tether::protocol::Message;
///
/// let msg: Message = serde_json::from_str(
///     r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#,
/// ).unwrap();
/// assert!(msg.is_request());
/// assert!(!msg.is_notification());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier. Present for requests and responses,
    /// absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name; present for requests and notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// Any fields outside the JSON-RPC 2.0 envelope, preserved verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Message {
    /// `true` when the message carries an `id` and a `method` (a request
    /// expecting a correlated response).
    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    /// `true` when the message carries a `method` but no `id`.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// `true` when this is the MCP `initialize` handshake request.
    pub fn is_initialize(&self) -> bool {
        self.method.as_deref() == Some(METHOD_INITIALIZE)
    }
}

/// Tags an `initialize` request with proxy identity metadata.
///
/// The proxy's `{name, version}` pair is attached under
/// `params.clientInfo.proxy`. All original fields of the message are left
/// intact; servers that ignore unknown `clientInfo` fields are unaffected.
/// Messages that are not `initialize` requests are returned unchanged.
///
/// # Examples
///
/// ```
/// use mcp_tether::protocol::{tag_initialize, Message};
///
/// let mut msg: Message = serde_json::from_str(
///     r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"clientInfo":{"name":"editor","version":"1.0"}}}"#,
/// ).unwrap();
/// tag_initialize(&mut msg);
///
/// let params = msg.params.unwrap();
/// assert_eq!(params["clientInfo"]["name"], "editor");
/// assert!(params["clientInfo"]["proxy"]["name"].is_string());
/// ```
pub fn tag_initialize(message: &mut Message) {
    if !message.is_initialize() {
        return;
    }

    let params = message
        .params
        .get_or_insert_with(|| serde_json::json!({}));

    if let Some(obj) = params.as_object_mut() {
        let client_info = obj
            .entry("clientInfo".to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let Some(info) = client_info.as_object_mut() {
            info.insert(
                "proxy".to_string(),
                serde_json::json!({
                    "name": PROXY_NAME,
                    "version": PROXY_VERSION,
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Message {
        serde_json::from_str(raw).expect("valid message")
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[test]
    fn test_request_classified() {
        let msg = parse(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
        assert!(msg.is_request());
        assert!(!msg.is_notification());
    }

    #[test]
    fn test_notification_classified() {
        let msg = parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(msg.is_notification());
        assert!(!msg.is_request());
    }

    #[test]
    fn test_response_is_neither_request_nor_notification() {
        let msg = parse(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#);
        assert!(!msg.is_request());
        assert!(!msg.is_notification());
    }

    #[test]
    fn test_is_initialize_true_for_initialize_method() {
        let msg = parse(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#);
        assert!(msg.is_initialize());
    }

    #[test]
    fn test_is_initialize_false_for_other_methods() {
        let msg = parse(r#"{"jsonrpc":"2.0","id":0,"method":"ping"}"#);
        assert!(!msg.is_initialize());
    }

    // -----------------------------------------------------------------------
    // Round-trip fidelity
    // -----------------------------------------------------------------------

    #[test]
    fn test_roundtrip_preserves_all_fields() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#;
        let msg = parse(raw);
        let back = serde_json::to_value(&msg).unwrap();
        let original: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_roundtrip_preserves_unknown_fields() {
        let raw = r#"{"jsonrpc":"2.0","method":"ping","_meta":{"traceId":"abc"}}"#;
        let msg = parse(raw);
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["_meta"]["traceId"], "abc");
    }

    #[test]
    fn test_roundtrip_preserves_error_object() {
        let raw = r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32601,"message":"Method not found"}}"#;
        let msg = parse(raw);
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["error"]["code"], -32601);
    }

    // -----------------------------------------------------------------------
    // tag_initialize
    // -----------------------------------------------------------------------

    #[test]
    fn test_tag_initialize_attaches_proxy_metadata() {
        let mut msg = parse(
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"clientInfo":{"name":"editor","version":"2.1"}}}"#,
        );
        tag_initialize(&mut msg);

        let params = msg.params.unwrap();
        assert_eq!(params["clientInfo"]["proxy"]["name"], PROXY_NAME);
        assert_eq!(params["clientInfo"]["proxy"]["version"], PROXY_VERSION);
    }

    #[test]
    fn test_tag_initialize_keeps_original_client_info() {
        let mut msg = parse(
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"clientInfo":{"name":"editor","version":"2.1"},"capabilities":{}}}"#,
        );
        tag_initialize(&mut msg);

        let params = msg.params.unwrap();
        assert_eq!(params["clientInfo"]["name"], "editor");
        assert_eq!(params["clientInfo"]["version"], "2.1");
        assert!(params["capabilities"].is_object());
    }

    #[test]
    fn test_tag_initialize_creates_missing_params() {
        let mut msg = parse(r#"{"jsonrpc":"2.0","id":0,"method":"initialize"}"#);
        tag_initialize(&mut msg);

        let params = msg.params.expect("params created");
        assert!(params["clientInfo"]["proxy"]["name"].is_string());
    }

    #[test]
    fn test_tag_initialize_ignores_other_messages() {
        let mut msg = parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        tag_initialize(&mut msg);
        assert!(msg.params.is_none());
    }

    #[test]
    fn test_tag_initialize_ignores_responses() {
        let mut msg = parse(r#"{"jsonrpc":"2.0","id":0,"result":{}}"#);
        tag_initialize(&mut msg);
        assert!(msg.params.is_none());
    }
}

//! Connection manager integration tests using wiremock
//!
//! The mock server plays an MCP endpoint rejecting or accepting transport
//! probes. Streamable HTTP probes are distinguished from legacy SSE probes
//! by the `MCP-Protocol-Version` header only the former sends.
//!
//! Covered behavior:
//!
//! - Servers that need no authorization connect without invoking the
//!   authorization hook.
//! - A 401 triggers the hook exactly once, and the same kind is retried
//!   with the fresh token.
//! - A non-auth rejection after the token was obtained falls back to the
//!   next kind without a second authorization.
//! - Exhausting all kinds yields a terminal `ConnectionFailed`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_tether::auth::store::{CredentialStore, TokenSet};
use mcp_tether::connect::{ConnectionManager, TransportStrategy};
use mcp_tether::transport::TransportKind;
use mcp_tether::TetherError;

/// The protocol header only the Streamable HTTP transport sends.
const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";
const PROTOCOL_VALUE: &str = "2025-03-26";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_manager(
    server_uri: &str,
    dir: &std::path::Path,
    strategy: TransportStrategy,
) -> ConnectionManager {
    let server_url = url::Url::parse(server_uri).unwrap();
    let store = Arc::new(CredentialStore::new(dir, &server_url).unwrap());
    ConnectionManager::new(server_url, strategy, Duration::from_secs(5), store)
}

fn fresh_tokens(access: &str) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        token_type: "Bearer".to_string(),
        expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        refresh_token: None,
        scope: None,
    }
}

/// An authorization hook that must never run.
fn forbidden_auth() -> impl Fn() -> std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<TokenSet>> + Send>,
> {
    || Box::pin(async { panic!("authorization hook must not be invoked") })
}

// ---------------------------------------------------------------------------
// No authorization required
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connects_unauthenticated_when_server_allows() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    // 405: the server offers no GET stream but accepts the transport.
    Mock::given(method("GET"))
        .and(header(PROTOCOL_HEADER, PROTOCOL_VALUE))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::HttpOnly);
    let transport = manager.connect(forbidden_auth()).await.unwrap();
    assert_eq!(transport.kind(), TransportKind::Streamable);
}

#[tokio::test]
async fn test_stored_token_attached_on_first_attempt() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    let server_url = url::Url::parse(&server.uri()).unwrap();
    CredentialStore::new(dir.path(), &server_url)
        .unwrap()
        .save_tokens(&fresh_tokens("stored-token"))
        .unwrap();

    // Only a request carrying the stored bearer token is accepted.
    Mock::given(method("GET"))
        .and(header(PROTOCOL_HEADER, PROTOCOL_VALUE))
        .and(header("Authorization", "Bearer stored-token"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::HttpOnly);
    let transport = manager.connect(forbidden_auth()).await.unwrap();
    assert_eq!(transport.kind(), TransportKind::Streamable);
}

// ---------------------------------------------------------------------------
// Lazy authorization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_401_invokes_hook_once_and_retries_same_kind() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    // First probe: 401.
    Mock::given(method("GET"))
        .and(header(PROTOCOL_HEADER, PROTOCOL_VALUE))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Bearer error=\"invalid_token\""),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Retry with the fresh token: accepted.
    Mock::given(method("GET"))
        .and(header(PROTOCOL_HEADER, PROTOCOL_VALUE))
        .and(header("Authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let auth_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&auth_calls);

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::HttpOnly);
    let transport = manager
        .connect(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(fresh_tokens("fresh-token"))
            }
        })
        .await
        .unwrap();

    assert_eq!(transport.kind(), TransportKind::Streamable);
    assert_eq!(auth_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_auth_failure_then_kind_rejection_falls_back_without_second_auth() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    // Kind A (streamable), first probe: authorization failure.
    Mock::given(method("GET"))
        .and(header(PROTOCOL_HEADER, PROTOCOL_VALUE))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Bearer error=\"invalid_token\""),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Kind A, post-token retry: non-auth rejection.
    Mock::given(method("GET"))
        .and(header(PROTOCOL_HEADER, PROTOCOL_VALUE))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Kind B (legacy SSE, no protocol header): succeeds with the token
    // obtained during kind A's attempt.
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer fresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_raw("event: endpoint\ndata: /message\n\n", "text/event-stream"),
        )
        .mount(&server)
        .await;

    let auth_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&auth_calls);

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::HttpFirst);
    let transport = manager
        .connect(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(fresh_tokens("fresh-token"))
            }
        })
        .await
        .unwrap();

    assert_eq!(
        transport.kind(),
        TransportKind::Sse,
        "manager must have fallen back to the SSE kind"
    );
    assert_eq!(
        auth_calls.load(Ordering::SeqCst),
        1,
        "the interactive flow must not run a second time in the same attempt"
    );
}

#[tokio::test]
async fn test_auth_hook_failure_is_terminal() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::HttpOnly);
    let err = manager
        .connect(|| async {
            Err(TetherError::AuthorizationDenied("user declined".to_string()).into())
        })
        .await
        .unwrap_err();

    assert!(
        matches!(
            err.downcast_ref::<TetherError>(),
            Some(TetherError::AuthorizationDenied(_))
        ),
        "hook failures must propagate untouched, got: {err}"
    );
}

// ---------------------------------------------------------------------------
// Exhaustion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_all_kinds_rejected_is_connection_failed() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let auth_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&auth_calls);

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::HttpFirst);
    let err = manager
        .connect(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(fresh_tokens("unused"))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TetherError>(),
        Some(TetherError::ConnectionFailed(_))
    ));
    assert_eq!(
        auth_calls.load(Ordering::SeqCst),
        0,
        "non-auth rejections must not trigger authorization"
    );
}

// ---------------------------------------------------------------------------
// SSE transport end-to-end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sse_connect_and_send_roundtrip() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_raw(
                    "event: endpoint\ndata: /message?sessionId=42\n\n",
                    "text/event-stream",
                ),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let manager = make_manager(&server.uri(), dir.path(), TransportStrategy::SseOnly);
    let transport = manager.connect(forbidden_auth()).await.unwrap();
    assert_eq!(transport.kind(), TransportKind::Sse);

    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string())
        .await
        .unwrap();
}

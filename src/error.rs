//! Error types for mcp-tether
//!
//! This module defines all error types used throughout the proxy, using
//! `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcp-tether operations
///
/// This enum encompasses all possible errors that can occur during
/// authorization coordination, transport negotiation, and message
/// bridging.
#[derive(Error, Debug)]
pub enum TetherError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OAuth callback did not arrive within the configured timeout
    #[error("Authorization timed out: {0}")]
    AuthorizationTimedOut(String),

    /// The `state` parameter in the OAuth callback did not match the one
    /// issued for the pending attempt
    #[error("Authorization state mismatch")]
    AuthorizationStateMismatch,

    /// The user or the authorization server declined the request
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The code-for-token exchange at the token endpoint failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// A refresh-token exchange failed (recovered locally by falling back
    /// to a full interactive authorization)
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// Authorization-related errors that are not one of the specific
    /// variants above (discovery, registration, PKCE support)
    #[error("Authorization error: {0}")]
    Auth(String),

    /// All configured transport kinds and retries were exhausted
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A transport terminated normally
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Transport-level I/O failure (not a normal close)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single message could not be delivered to the peer side
    #[error("Forwarding error: {0}")]
    Forwarding(String),

    /// Cross-process lock file errors
    #[error("Lock error: {0}")]
    Lock(String),

    /// Credential store errors
    #[error("Credential store error: {0}")]
    Store(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for mcp-tether operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns `true` when `err` wraps an authorization-class failure.
///
/// The transports surface `401 Unauthorized` responses as
/// [`TetherError::Auth`]; the connection manager uses this predicate to
/// decide whether to trigger the lazy authorization hook or to fall back to
/// another transport kind.
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<TetherError>(), Some(TetherError::Auth(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = TetherError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_authorization_timed_out_display() {
        let error = TetherError::AuthorizationTimedOut("no callback in 300s".to_string());
        assert_eq!(
            error.to_string(),
            "Authorization timed out: no callback in 300s"
        );
    }

    #[test]
    fn test_state_mismatch_display() {
        let error = TetherError::AuthorizationStateMismatch;
        assert_eq!(error.to_string(), "Authorization state mismatch");
    }

    #[test]
    fn test_authorization_denied_display() {
        let error = TetherError::AuthorizationDenied("access_denied".to_string());
        assert_eq!(error.to_string(), "Authorization denied: access_denied");
    }

    #[test]
    fn test_token_exchange_failed_display() {
        let error = TetherError::TokenExchangeFailed("400 invalid_grant".to_string());
        assert_eq!(error.to_string(), "Token exchange failed: 400 invalid_grant");
    }

    #[test]
    fn test_token_refresh_failed_display() {
        let error = TetherError::TokenRefreshFailed("revoked".to_string());
        assert_eq!(error.to_string(), "Token refresh failed: revoked");
    }

    #[test]
    fn test_connection_failed_display() {
        let error = TetherError::ConnectionFailed("all transports exhausted".to_string());
        assert_eq!(
            error.to_string(),
            "Connection failed: all transports exhausted"
        );
    }

    #[test]
    fn test_transport_closed_display() {
        let error = TetherError::TransportClosed("remote hung up".to_string());
        assert_eq!(error.to_string(), "Transport closed: remote hung up");
    }

    #[test]
    fn test_forwarding_error_display() {
        let error = TetherError::Forwarding("send failed".to_string());
        assert_eq!(error.to_string(), "Forwarding error: send failed");
    }

    #[test]
    fn test_lock_error_display() {
        let error = TetherError::Lock("lock file unreadable".to_string());
        assert_eq!(error.to_string(), "Lock error: lock file unreadable");
    }

    #[test]
    fn test_store_error_display() {
        let error = TetherError::Store("partial record".to_string());
        assert_eq!(error.to_string(), "Credential store error: partial record");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: TetherError = io_error.into();
        assert!(matches!(error, TetherError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_str = "{invalid json}";
        let json_error = serde_json::from_str::<serde_json::Value>(json_str).unwrap_err();
        let error: TetherError = json_error.into();
        assert!(matches!(error, TetherError::Serialization(_)));
    }

    #[test]
    fn test_is_auth_error_matches_auth_variant() {
        let err: anyhow::Error = TetherError::Auth("401".to_string()).into();
        assert!(is_auth_error(&err));
    }

    #[test]
    fn test_is_auth_error_rejects_transport_variant() {
        let err: anyhow::Error = TetherError::Transport("connection reset".to_string()).into();
        assert!(!is_auth_error(&err));
    }

    #[test]
    fn test_is_auth_error_rejects_plain_anyhow() {
        let err = anyhow::anyhow!("some opaque failure");
        assert!(!is_auth_error(&err));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TetherError>();
    }
}

//! PKCE S256 pair generation and verification
//!
//! Implements the Proof Key for Code Exchange extension (RFC 7636) with the
//! `S256` challenge method mandated by OAuth 2.1. A fresh pair is generated
//! for every authorization attempt; the verifier is never reused.

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::auth::discovery::AuthorizationServerMetadata;
use crate::error::{Result, TetherError};

/// A PKCE pair: the random code verifier and its derived S256 challenge.
///
/// The verifier travels to the token endpoint during the code exchange; the
/// challenge travels to the authorization endpoint in the initial redirect.
///
/// # Examples
///
/// ```
/// use mcp_tether::auth::pkce::PkcePair;
///
/// let pair = PkcePair::generate();
/// assert_eq!(pair.verifier.len(), 43);
/// assert_ne!(pair.verifier, pair.challenge);
/// ```
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// base64url (no padding) encoding of 32 random bytes; 43 characters.
    pub verifier: String,
    /// base64url (no padding) of SHA-256(verifier), per RFC 7636 section 4.2.
    pub challenge: String,
}

impl PkcePair {
    /// Generates a fresh pair from 32 cryptographically random bytes.
    pub fn generate() -> Self {
        use rand::RngCore as _;

        let mut random_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut random_bytes);

        let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
        let challenge = challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }
}

/// Computes the S256 challenge for a given verifier string.
///
/// `BASE64URL(SHA256(ASCII(code_verifier)))`, no padding.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Checks that the authorization server advertises the `S256` challenge
/// method.
///
/// OAuth 2.1 requires PKCE for public clients; a server that does not
/// advertise `S256` in `code_challenge_methods_supported` (or omits the
/// field) is refused rather than silently downgraded.
///
/// # Errors
///
/// Returns [`TetherError::Auth`] when `S256` support is absent.
pub fn verify_s256_support(metadata: &AuthorizationServerMetadata) -> Result<()> {
    let supported = metadata
        .code_challenge_methods_supported
        .as_deref()
        .unwrap_or(&[]);

    if supported.iter().any(|m| m == "S256") {
        Ok(())
    } else {
        Err(TetherError::Auth(
            "authorization server does not support PKCE S256".to_string(),
        )
        .into())
    }
}

/// Generates a random URL-safe nonce for the OAuth `state` parameter.
///
/// 16 random bytes, base64url without padding.
pub fn state_nonce() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

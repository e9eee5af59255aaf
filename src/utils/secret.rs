//! Secret and token-handle generation and hashing.
//!
//! Client secrets are hashed with bcrypt before storage and verified with a
//! constant-time comparison. Opaque token handles (authorization codes,
//! refresh tokens, reference ids) are high-entropy random strings; they are
//! stored as plain SHA-256 digests, which is enough because the input is
//! already uniformly random and lookups must stay cheap.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::ServerError;

/// Bcrypt cost factor for client secrets.
const BCRYPT_COST: u32 = 12;

/// Length of generated opaque handles: 256 bits of entropy in base64url.
pub const HANDLE_LENGTH: usize = 43;

const HANDLE_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generates a random opaque handle suitable for codes and reference tokens.
pub fn generate_handle() -> String {
    let mut rng = rand::thread_rng();
    (0..HANDLE_LENGTH)
        .map(|_| HANDLE_CHARSET[rng.gen_range(0..HANDLE_CHARSET.len())] as char)
        .collect()
}

/// Generates a fresh concurrency token.
pub fn generate_concurrency_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// SHA-256 digest of a handle, base64url-encoded, as persisted in
/// `reference_id` columns.
pub fn hash_handle(handle: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(handle.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Hashes a client secret for storage.
pub fn hash_client_secret(secret: &str) -> Result<String, ServerError> {
    bcrypt::hash(secret, BCRYPT_COST)
        .map_err(|e| ServerError::Internal(anyhow::anyhow!("secret hashing failed: {e}")))
}

/// Verifies a presented client secret against the stored bcrypt hash.
pub fn verify_client_secret(secret: &str, hash: &str) -> bool {
    bcrypt::verify(secret, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_url_safe() {
        let a = generate_handle();
        let b = generate_handle();
        assert_ne!(a, b);
        assert_eq!(a.len(), HANDLE_LENGTH);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_handle_hash_is_deterministic() {
        let handle = generate_handle();
        assert_eq!(hash_handle(&handle), hash_handle(&handle));
        assert_eq!(hash_handle(&handle).len(), 43);
    }

    #[test]
    fn test_client_secret_round_trip() {
        let hash = hash_client_secret("s3cret").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_client_secret("s3cret", &hash));
        assert!(!verify_client_secret("wrong", &hash));
    }

    #[test]
    fn test_verify_tolerates_malformed_hash() {
        assert!(!verify_client_secret("s3cret", "not-a-bcrypt-hash"));
    }
}

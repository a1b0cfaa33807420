//! API token persistence.
//!
//! Requests are authenticated by a bearer token looked up in a persisted
//! token set.  Only the SHA-256 digest of each token is stored.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;

pub mod sqlite;

pub use sqlite::SqliteTokenStore;

/// Shortest generated token.
pub const MIN_TOKEN_LEN: usize = 35;

/// Longest generated token.
pub const MAX_TOKEN_LEN: usize = 50;

/// Stored token row.  The token itself is never kept.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    /// Hex-encoded SHA-256 of the token.
    pub token_hash: String,
    /// Free-form operator note.
    pub label: String,
    pub active: bool,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

/// Token lookup used by the auth middleware.
pub trait TokenStore: Send + Sync + 'static {
    /// Return `true` if `token` is known and active.
    fn verify(&self, token: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}

/// Generate a random alphanumeric token of 35 to 50 characters.
pub fn generate_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(MIN_TOKEN_LEN..=MAX_TOKEN_LEN);
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Hex SHA-256 digest of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_shape() {
        for _ in 0..50 {
            let token = generate_token();
            assert!((MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len()));
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_generate_token_is_random() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_hash_token() {
        // SHA-256 of "abc".
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

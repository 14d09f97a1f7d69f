//! # shield-auth-simple
//!
//! SHA-256 based implementation of `AccessProvider`.
//! Issues API tokens from the OS RNG and compares reviewer passcodes and
//! tokens by digest.

use shield_core::traits::AccessProvider;
use sha2::{Digest, Sha256};

/// Random bytes per issued token (hex-encoded to twice as many characters).
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Default)]
pub struct SimpleAccessProvider;

impl SimpleAccessProvider {
    pub fn new() -> Self {
        Self
    }
}

fn digest(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

impl AccessProvider for SimpleAccessProvider {
    fn issue_token(&self) -> anyhow::Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        getrandom::getrandom(&mut bytes)
            .map_err(|err| anyhow::anyhow!("os rng unavailable: {err}"))?;
        Ok(hex::encode(bytes))
    }

    /// Compares fixed-length digests without short-circuiting, so the time
    /// taken does not depend on how much of the secret matched.
    fn secrets_match(&self, presented: &str, stored: &str) -> bool {
        if presented.is_empty() || stored.is_empty() {
            return false;
        }
        digest(presented)
            .iter()
            .zip(digest(stored).iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

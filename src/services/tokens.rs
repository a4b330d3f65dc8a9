// src/services/tokens.rs

//! Single-use secrets. Pure generation over the OS random source; nothing
//! here touches storage.

use rand::{Rng, RngCore, rngs::OsRng};

use crate::utils::hash::digest_token;

/// Bytes of entropy in a reset token.
const RESET_TOKEN_BYTES: usize = 32;

/// Six-digit code drawn uniformly from 100000..=999999.
pub fn issue_otp() -> String {
    OsRng.gen_range(100_000..=999_999u32).to_string()
}

/// A freshly minted reset token. Only `hash` may be persisted.
pub struct ResetToken {
    pub raw: String,
    pub hash: String,
}

impl std::fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetToken")
            .field("raw", &"[REDACTED]")
            .field("hash", &self.hash)
            .finish()
    }
}

pub fn issue_reset_token() -> ResetToken {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let hash = digest_token(&raw);
    ResetToken { raw, hash }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::validate::is_reset_token;

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..200 {
            let otp = issue_otp();
            assert_eq!(otp.len(), 6);
            let n: u32 = otp.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn reset_token_is_hex_and_hash_differs() {
        let token = issue_reset_token();
        assert!(is_reset_token(&token.raw));
        assert_ne!(token.raw, token.hash);
        assert_eq!(token.hash, digest_token(&token.raw));
        assert_ne!(token.raw, issue_reset_token().raw);
    }
}

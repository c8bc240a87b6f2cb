//! PKCE (RFC 7636) verifier/challenge generation and CSRF state tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind a verifier. 32 bytes encode to 43 characters.
pub const VERIFIER_BYTES: usize = 32;

/// Random bytes behind a CSRF state token.
pub const STATE_BYTES: usize = 32;

/// Challenge method. Only S256 exists; the provider rejects `plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceMethod {
    S256,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkceMethod::S256 => "S256",
        }
    }
}

#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: PkceMethod,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = derive_challenge(&verifier);
        Self {
            verifier,
            challenge,
            method: PkceMethod::S256,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

/// 256 bits from the OS-seeded thread RNG, base64url without padding.
///
/// `rand::rng()` panics if the OS entropy source is unavailable, so a weak
/// verifier is never produced.
pub fn generate_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generate a random CSRF state token
pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn verifier_length_is_within_rfc_bounds() {
        for _ in 0..64 {
            let verifier = generate_verifier();
            assert!(verifier.len() >= 43 && verifier.len() <= 128);
            assert!(is_url_safe(&verifier));
        }
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_verifier();
        assert_eq!(derive_challenge(&verifier), derive_challenge(&verifier));
    }

    #[test]
    fn challenge_matches_rfc_7636_example() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mJ92K1kLvGuCJ6jWIrFxIg5Jq-r5XQ";
        assert_eq!(
            derive_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn pairs_are_unique_and_consistent() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_eq!(a.challenge, derive_challenge(&a.verifier));
        assert_eq!(a.method.as_str(), "S256");
        assert!(!a.challenge.contains('='));
    }

    #[test]
    fn state_tokens_are_url_safe() {
        let state = generate_state();
        assert!(is_url_safe(&state));
        assert_ne!(state, generate_state());
    }
}

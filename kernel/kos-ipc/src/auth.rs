//! Challenge/response authentication for the request channel, per spec.md
//! §6: the client sends `(entity_type, entity_id, fingerprint)`, the server
//! issues a 32-byte random challenge, the client signs
//! `SHA-256(challenge ∥ fingerprint)`, and the server verifies before
//! minting a session.
//!
//! `fingerprint` itself is computed by `kos_cap::identity::fingerprint` and
//! treated here as an opaque credential string, consistent with spec.md
//! §9's note that the fingerprint formula is not a security primitive —
//! this module is what actually authenticates a client, over SHA-256
//! rather than the fingerprint encoding.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of a challenge, in bytes, per spec.md §6.
pub const CHALLENGE_LEN: usize = 32;

/// A server-issued authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge(pub [u8; CHALLENGE_LEN]);

impl Challenge {
    /// Generates a fresh random challenge.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Computes the expected response for `fingerprint`:
    /// `SHA-256(challenge ∥ fingerprint)`, hex-encoded.
    #[must_use]
    pub fn expected_response(&self, fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(fingerprint.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// `true` if `candidate` matches the response this challenge expects
    /// from `fingerprint`.
    #[must_use]
    pub fn verify(&self, fingerprint: &str, candidate: &str) -> bool {
        self.expected_response(fingerprint) == candidate
    }
}

/// The client-supplied identity triple that opens an authentication
/// handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub entity_type: String,
    pub entity_id: String,
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_fingerprint_verifies() {
        let challenge = Challenge::generate();
        let response = challenge.expected_response("fp-123");
        assert!(challenge.verify("fp-123", &response));
    }

    #[test]
    fn wrong_fingerprint_fails_verification() {
        let challenge = Challenge::generate();
        let response = challenge.expected_response("fp-123");
        assert!(!challenge.verify("fp-456", &response));
    }

    #[test]
    fn challenges_are_not_all_identical() {
        let a = Challenge::generate();
        let b = Challenge::generate();
        assert_ne!(a, b);
    }
}

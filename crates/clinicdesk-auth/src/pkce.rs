//! PKCE (Proof Key for Code Exchange) primitives.
//!
//! Implements the client side of RFC 7636 with the S256 method only, plus the
//! random state nonce used to bind an authorization response to the request
//! that started it.
//!
//! # Example
//!
//! ```
//! use clinicdesk_auth::host::OsRandom;
//! use clinicdesk_auth::pkce::{PkceChallenge, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate(&OsRandom);
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! assert_eq!(challenge.as_str().len(), 43);
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::host::RandomSource;

/// Number of random bytes behind a generated verifier or state nonce.
/// 32 bytes encode to 43 base64url characters.
const RANDOM_BYTES: usize = 32;

/// Errors raised when a persisted verifier fails validation.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be unreserved URI characters ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,
}

/// PKCE challenge method. Only S256 is ever sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    /// SHA-256 hash of the verifier.
    #[default]
    S256,
}

impl PkceChallengeMethod {
    /// Get the method as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// PKCE code verifier.
///
/// A high-entropy random string of 43-128 characters drawn from
/// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Wraps an existing verifier, e.g. one read back from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not 43-128 or a character falls
    /// outside the unreserved set.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier.chars().all(is_unreserved) {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generates a fresh verifier from 32 random bytes (43 characters).
    #[must_use]
    pub fn generate(rng: &dyn RandomSource) -> Self {
        Self(random_token(rng))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the verifier and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for PkceVerifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// PKCE code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Derives the S256 challenge for `verifier`.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let hash = Sha256::digest(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hash))
    }

    /// The challenge method used to derive this challenge.
    #[must_use]
    pub fn method(&self) -> PkceChallengeMethod {
        PkceChallengeMethod::S256
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PkceChallenge {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates a random base64url token (used for the `state` nonce).
#[must_use]
pub fn random_token(rng: &dyn RandomSource) -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::OsRandom;

    struct FixedRandom(u8);

    impl RandomSource for FixedRandom {
        fn fill_bytes(&self, buf: &mut [u8]) {
            buf.fill(self.0);
        }
    }

    #[test]
    fn test_generated_verifier_is_valid() {
        let verifier = PkceVerifier::generate(&OsRandom);
        let len = verifier.as_str().len();
        assert_eq!(len, 43);
        assert!(verifier.as_str().chars().all(is_unreserved));
        assert!(PkceVerifier::new(verifier.into_inner()).is_ok());
    }

    #[test]
    fn test_verifiers_are_unique() {
        let v1 = PkceVerifier::generate(&OsRandom);
        let v2 = PkceVerifier::generate(&OsRandom);
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_generation_uses_random_source() {
        let a = PkceVerifier::generate(&FixedRandom(7));
        let b = PkceVerifier::generate(&FixedRandom(7));
        assert_eq!(a, b);
        assert_ne!(a, PkceVerifier::generate(&FixedRandom(8)));
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(matches!(
            PkceVerifier::new("a".repeat(42)),
            Err(PkceError::InvalidVerifierLength(42))
        ));
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(matches!(
            PkceVerifier::new("a".repeat(129)),
            Err(PkceError::InvalidVerifierLength(129))
        ));
    }

    #[test]
    fn test_verifier_rejects_reserved_characters() {
        let invalid = format!("{}!@#", "a".repeat(50));
        assert!(matches!(
            PkceVerifier::new(invalid),
            Err(PkceError::InvalidVerifierCharacters)
        ));

        let all_unreserved = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._~";
        assert!(PkceVerifier::new(all_unreserved.to_string()).is_ok());
    }

    #[test]
    fn test_rfc7636_appendix_b_test_vector() {
        let verifier =
            PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(
            challenge.as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(challenge.method().as_str(), "S256");
    }

    #[test]
    fn test_challenge_matches_manual_digest_for_various_lengths() {
        for len in [43usize, 64, 100, 128] {
            let verifier = PkceVerifier::new("x~".repeat(64)[..len].to_string()).unwrap();
            let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_str().as_bytes()));
            assert_eq!(PkceChallenge::from_verifier(&verifier).as_str(), expected);
        }
    }

    #[test]
    fn test_random_token_is_url_safe() {
        let token = random_token(&OsRandom);
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(is_unreserved));
        assert_ne!(token, random_token(&OsRandom));
    }

    #[test]
    fn test_method_display() {
        assert_eq!(PkceChallengeMethod::default().to_string(), "S256");
    }
}

//! Proof Key for Code Exchange (RFC 7636).
//!
//! The authorization endpoint stores the client's `code_challenge` alongside
//! the issued code; the token endpoint verifies the presented `code_verifier`
//! against it before redeeming.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// code_verifier length bounds (RFC 7636 §4.1).
pub const CODE_VERIFIER_MIN_LENGTH: usize = 43;
pub const CODE_VERIFIER_MAX_LENGTH: usize = 128;

/// A supported code challenge transformation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodeChallengeMethod {
    Plain,
    S256,
}

impl CodeChallengeMethod {
    /// Method names are case-sensitive on the wire ("S256", "plain").
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plain" => Some(CodeChallengeMethod::Plain),
            "S256" => Some(CodeChallengeMethod::S256),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }

    /// Verifies a code_verifier against the stored challenge.
    pub fn verify(&self, verifier: &str, challenge: &str) -> bool {
        match self {
            CodeChallengeMethod::S256 => constant_time_eq(&s256_challenge(verifier), challenge),
            CodeChallengeMethod::Plain => constant_time_eq(verifier, challenge),
        }
    }
}

/// BASE64URL(SHA256(verifier)), the S256 transformation.
pub fn s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Structural check on a presented code_verifier: 43–128 characters from the
/// unreserved set (RFC 7636 §4.1).
pub fn is_valid_code_verifier(verifier: &str) -> bool {
    (CODE_VERIFIER_MIN_LENGTH..=CODE_VERIFIER_MAX_LENGTH).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vector from RFC 7636 Appendix B.
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_matches_rfc_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(CodeChallengeMethod::S256.verify(VERIFIER, CHALLENGE));
    }

    #[test]
    fn test_s256_rejects_wrong_verifier() {
        assert!(!CodeChallengeMethod::S256
            .verify("wrong_verifier_that_is_long_enough_to_be_plausible", CHALLENGE));
    }

    #[test]
    fn test_plain_compares_directly() {
        assert!(CodeChallengeMethod::Plain.verify(VERIFIER, VERIFIER));
        assert!(!CodeChallengeMethod::Plain.verify(VERIFIER, CHALLENGE));
    }

    #[test]
    fn test_method_parse_is_case_sensitive() {
        assert_eq!(CodeChallengeMethod::parse("S256"), Some(CodeChallengeMethod::S256));
        assert_eq!(CodeChallengeMethod::parse("s256"), None);
        assert_eq!(CodeChallengeMethod::parse("plain"), Some(CodeChallengeMethod::Plain));
        assert_eq!(CodeChallengeMethod::parse("PLAIN"), None);
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(is_valid_code_verifier(&"a".repeat(43)));
        assert!(is_valid_code_verifier(&"a".repeat(128)));
        assert!(!is_valid_code_verifier(&"a".repeat(42)));
        assert!(!is_valid_code_verifier(&"a".repeat(129)));
    }

    #[test]
    fn test_verifier_charset() {
        assert!(is_valid_code_verifier("abcABC123-._~abcABC123-._~abcABC123-._~abcd"));
        assert!(!is_valid_code_verifier("abcABC123+/=abcABC123abcABC123abcABC123abcd"));
        assert!(!is_valid_code_verifier("has spaces in it has spaces in it has space"));
    }

    proptest::proptest! {
        #[test]
        fn prop_s256_verifies_its_own_challenge(verifier in "[A-Za-z0-9._~-]{43,128}") {
            proptest::prop_assert!(is_valid_code_verifier(&verifier));
            let challenge = s256_challenge(&verifier);
            proptest::prop_assert!(CodeChallengeMethod::S256.verify(&verifier, &challenge));
        }

        #[test]
        fn prop_distinct_verifiers_never_collide(
            a in "[A-Za-z0-9]{43}",
            b in "[A-Za-z0-9]{43}",
        ) {
            if a != b {
                proptest::prop_assert!(!CodeChallengeMethod::S256.verify(&b, &s256_challenge(&a)));
            }
        }
    }
}

//! Token verification boundary (§4.6).
//!
//! The core only *consumes* a verification key — signing/rotation belongs
//! to the external auth service. Algorithm is ECDSA P-256 (ES256); the
//! verifier is handed a PEM-encoded public key once at startup and checks
//! signature, issuer, and expiry. The only claims the core inspects are
//! `sub` (user id), `iss`, and `exp` — same "verify-only, three claims"
//! boundary as the teacher's `validate_session_token`, but asymmetric and
//! read-only instead of the teacher's HS256 create+validate pair.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Typed verification outcome (§4.6, §7 Authentication taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Missing,
    Invalid,
    Expired,
}

impl TokenError {
    /// Machine code surfaced in the 401 body / `{type:"Error"}` frame.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Missing => "MISSING_TOKEN",
            TokenError::Invalid => "INVALID_TOKEN",
            TokenError::Expired => "EXPIRED_TOKEN",
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Missing => write!(f, "missing bearer token"),
            TokenError::Invalid => write!(f, "invalid token"),
            TokenError::Expired => write!(f, "token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    exp: i64,
}

/// Verifies bearer tokens against a single ES256 public key. Stateless and
/// cheap to clone (the decoding key is behind an `Arc` internally via
/// `jsonwebtoken`'s own representation).
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    issuer: String,
}

impl TokenVerifier {
    /// Load the ES256 public key PEM from disk at `path` (`JWT_PUBLIC_KEY_PATH`).
    pub fn from_pem_file(path: &str, issuer: impl Into<String>) -> anyhow::Result<Self> {
        let pem = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read JWT public key at {path}: {e}"))?;
        let key = DecodingKey::from_ec_pem(&pem)
            .map_err(|e| anyhow::anyhow!("invalid ES256 public key at {path}: {e}"))?;
        Ok(Self {
            key,
            issuer: issuer.into(),
        })
    }

    #[cfg(test)]
    fn from_ec_pem(pem: &[u8], issuer: impl Into<String>) -> Self {
        Self {
            key: DecodingKey::from_ec_pem(pem).unwrap(),
            issuer: issuer.into(),
        }
    }

    /// Verify `token`, returning the subject's user id on success.
    ///
    /// `sub` is parsed as `i64` (§3 User identity); a non-numeric subject is
    /// treated as an invalid token rather than a separate error variant —
    /// the external auth service is trusted to only ever mint numeric
    /// subjects, so this path only triggers on a malformed or foreign token.
    pub fn verify(&self, token: &str) -> Result<i64, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }

        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        data.claims.sub.parse::<i64>().map_err(|_| TokenError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    // Test key pair generated once for this crate's tests only (not used
    // anywhere else); it is not a secret and rotating it is irrelevant.
    const TEST_PRIVATE_KEY: &str = include_str!("../testdata/es256_private.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../testdata/es256_public.pem");

    fn sign(sub: &str, iss: &str, exp: i64) -> String {
        #[derive(Serialize)]
        struct C<'a> {
            sub: &'a str,
            iss: &'a str,
            exp: i64,
        }
        let key = EncodingKey::from_ec_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::ES256), &C { sub, iss, exp }, &key).unwrap()
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::from_ec_pem(TEST_PUBLIC_KEY.as_bytes(), "chat-auth")
    }

    #[test]
    fn valid_token_yields_user_id() {
        let token = sign("42", "chat-auth", chrono::Utc::now().timestamp() + 3600);
        assert_eq!(verifier().verify(&token), Ok(42));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign("42", "chat-auth", chrono::Utc::now().timestamp() - 10);
        assert_eq!(verifier().verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let token = sign("42", "someone-else", chrono::Utc::now().timestamp() + 3600);
        assert_eq!(verifier().verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn empty_token_is_missing() {
        assert_eq!(verifier().verify(""), Err(TokenError::Missing));
    }

    #[test]
    fn non_numeric_subject_is_invalid() {
        let token = sign("not-a-number", "chat-auth", chrono::Utc::now().timestamp() + 3600);
        assert_eq!(verifier().verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(TokenError::Missing.code(), "MISSING_TOKEN");
        assert_eq!(TokenError::Invalid.code(), "INVALID_TOKEN");
        assert_eq!(TokenError::Expired.code(), "EXPIRED_TOKEN");
    }
}

//! Credential verifier (spec §4.B).
//!
//! Verifies bearer credentials extracted from an `Authorization: Bearer …`
//! header, a structured `auth.token` handshake field, or a `token` cookie.
//! Tokens are HS256 JWTs carrying a subject claim; per the Open Question in
//! spec §9, both `userId` and `sub` claims are accepted everywhere, the
//! permissive `userId || sub` read preserved for compatibility (see
//! DESIGN.md).

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The decoded claims expected in a gateway bearer token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Claims {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
}

impl Claims {
    /// The permissive `userId || sub` read (spec §9 Open Question).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.sub.as_deref())
    }
}

/// A successfully verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub user_id: String,
    pub raw_token: String,
}

/// Outcome of opportunistic credential extraction at connect time: absence
/// of a credential is not a failure, and cryptographic failure is silently
/// downgraded to anonymous (parity with spec §4.B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAuthOutcome {
    Authenticated(VerifiedCredential),
    Anonymous,
}

/// Failures surfaced to explicit `authenticate`/`register` handlers, which
/// must distinguish these cases in their ack payload (spec §6 dispatcher
/// table).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing-token")]
    MissingToken,
    #[error("invalid-token-format")]
    InvalidTokenFormat,
    #[error("invalid-token")]
    InvalidToken,
}

/// Where a bearer credential may be carried on an inbound connection.
#[derive(Debug, Clone, Default)]
pub struct CredentialSources<'a> {
    pub authorization_header: Option<&'a str>,
    pub handshake_token: Option<&'a str>,
    pub cookie_token: Option<&'a str>,
}

impl<'a> CredentialSources<'a> {
    /// Extract the raw bearer token, in precedence order: header, then
    /// handshake field, then cookie.
    #[must_use]
    pub fn extract(&self) -> Option<&'a str> {
        if let Some(header) = self.authorization_header {
            if let Some(token) = header.strip_prefix("Bearer ") {
                return Some(token.trim());
            }
            // Header present but not a bearer scheme: treat as absent, not malformed —
            // a non-bearer Authorization header is not this verifier's concern.
        }
        if let Some(token) = self.handshake_token {
            return Some(token);
        }
        self.cookie_token
    }
}

/// Verifies bearer credentials against a shared HMAC-SHA256 secret.
pub struct CredentialVerifier {
    secret: Vec<u8>,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }

    fn validation() -> Validation {
        let mut v = Validation::new(Algorithm::HS256);
        v.validate_exp = true;
        v.required_spec_claims.clear();
        v
    }

    /// Decode and verify a raw token, returning the claims on success.
    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        // A malformed JWT (wrong number of `.`-separated segments, or
        // non-base64 segments) fails with `invalid-token-format`; a
        // well-formed-but-invalid signature/claims fails with `invalid-token`.
        if token.split('.').count() != 3 {
            return Err(AuthError::InvalidTokenFormat);
        }
        decode::<Claims>(token, &self.decoding_key(), &Self::validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::Json(_)
                | jsonwebtoken::errors::ErrorKind::Base64(_)
                | jsonwebtoken::errors::ErrorKind::Utf8(_) => AuthError::InvalidTokenFormat,
                _ => AuthError::InvalidToken,
            })
    }

    /// Opportunistic verification at connect time (spec §4.B): absent
    /// credentials yield `Anonymous`; malformed credentials are a hard
    /// failure; cryptographic failure is silently downgraded to anonymous.
    pub fn verify_connect(&self, sources: &CredentialSources<'_>) -> Result<ConnectAuthOutcome, AuthError> {
        let Some(token) = sources.extract() else {
            return Ok(ConnectAuthOutcome::Anonymous);
        };
        match self.decode_claims(token) {
            Ok(claims) => match claims.subject() {
                Some(user_id) => Ok(ConnectAuthOutcome::Authenticated(VerifiedCredential {
                    user_id: user_id.to_string(),
                    raw_token: token.to_string(),
                })),
                None => {
                    debug!("token verified but carried no subject claim, treating as anonymous");
                    Ok(ConnectAuthOutcome::Anonymous)
                },
            },
            Err(AuthError::InvalidTokenFormat) => Err(AuthError::InvalidTokenFormat),
            Err(_) => {
                debug!("token verification failed cryptographically, downgrading to anonymous");
                Ok(ConnectAuthOutcome::Anonymous)
            },
        }
    }

    /// Explicit verification for the `authenticate`/`register` socket
    /// events, which must distinguish every failure mode in their ack.
    pub fn verify_explicit(&self, token: &str) -> Result<VerifiedCredential, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = self.decode_claims(token)?;
        let user_id = claims.subject().ok_or(AuthError::InvalidToken)?;
        Ok(VerifiedCredential {
            user_id: user_id.to_string(),
            raw_token: token.to_string(),
        })
    }

    /// Verify a token and assert its subject equals `expected_user_id`,
    /// used by `registerUser` (spec §4.C): the claimed subject must match.
    pub fn verify_matches(
        &self,
        token: &str,
        expected_user_id: &str,
    ) -> Result<VerifiedCredential, AuthError> {
        let credential = self.verify_explicit(token)?;
        if credential.user_id != expected_user_id {
            return Err(AuthError::InvalidToken);
        }
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn sign(secret: &str, claims: &Claims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn absent_credential_is_anonymous() {
        let verifier = CredentialVerifier::new("secret");
        let sources = CredentialSources::default();
        assert_eq!(
            verifier.verify_connect(&sources).unwrap(),
            ConnectAuthOutcome::Anonymous
        );
    }

    #[test]
    fn malformed_token_fails_with_invalid_format() {
        let verifier = CredentialVerifier::new("secret");
        let sources = CredentialSources {
            handshake_token: Some("not-a-jwt"),
            ..Default::default()
        };
        assert_eq!(
            verifier.verify_connect(&sources).unwrap_err(),
            AuthError::InvalidTokenFormat
        );
    }

    #[test]
    fn wrong_secret_downgrades_to_anonymous() {
        let claims = Claims {
            user_id: Some("u1".into()),
            sub: None,
            exp: Some(9_999_999_999),
        };
        let token = sign("other-secret", &claims);
        let verifier = CredentialVerifier::new("secret");
        let sources = CredentialSources {
            handshake_token: Some(&token),
            ..Default::default()
        };
        assert_eq!(
            verifier.verify_connect(&sources).unwrap(),
            ConnectAuthOutcome::Anonymous
        );
    }

    #[test]
    fn valid_token_authenticates() {
        let claims = Claims {
            user_id: Some("u1".into()),
            sub: None,
            exp: Some(9_999_999_999),
        };
        let token = sign("secret", &claims);
        let verifier = CredentialVerifier::new("secret");
        let sources = CredentialSources {
            authorization_header: Some(&format!("Bearer {token}")),
            ..Default::default()
        };
        let outcome = verifier.verify_connect(&sources).unwrap();
        assert_eq!(
            outcome,
            ConnectAuthOutcome::Authenticated(VerifiedCredential {
                user_id: "u1".into(),
                raw_token: token,
            })
        );
    }

    #[test]
    fn sub_claim_is_accepted_permissively() {
        let claims = Claims {
            user_id: None,
            sub: Some("u2".into()),
            exp: Some(9_999_999_999),
        };
        let token = sign("secret", &claims);
        let verifier = CredentialVerifier::new("secret");
        let credential = verifier.verify_explicit(&token).unwrap();
        assert_eq!(credential.user_id, "u2");
    }

    #[test]
    fn explicit_verify_requires_matching_subject() {
        let claims = Claims {
            user_id: Some("u1".into()),
            sub: None,
            exp: Some(9_999_999_999),
        };
        let token = sign("secret", &claims);
        let verifier = CredentialVerifier::new("secret");
        assert!(verifier.verify_matches(&token, "u1").is_ok());
        assert!(verifier.verify_matches(&token, "someone-else").is_err());
    }

    #[test]
    fn empty_explicit_token_is_missing() {
        let verifier = CredentialVerifier::new("secret");
        assert_eq!(
            verifier.verify_explicit("").unwrap_err(),
            AuthError::MissingToken
        );
    }
}

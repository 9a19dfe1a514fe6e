//! JWT verification
//!
//! Default [`TokenVerifier`] implementation over `jsonwebtoken` with the
//! algorithm pinned explicitly, so an attacker-controlled header can never
//! downgrade verification.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::warn;

use warden_core::{AuthnError, Result, TokenClaims, TokenVerifier};

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Minimum secret length (256 bits) for HS256.
const MIN_SECRET_LENGTH: usize = 32;

/// Shared-secret JWT verifier. Issuer and audience checks are opt-in;
/// expiry validation is always on.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: String,
    expected_issuer: Option<String>,
    expected_audience: Option<String>,
}

impl JwtVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LENGTH {
            warn!(
                "JWT verification secret is only {} bytes, recommended minimum is {} bytes for HS256",
                secret.len(),
                MIN_SECRET_LENGTH
            );
        }
        Self {
            secret,
            expected_issuer: None,
            expected_audience: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;
        if let Some(iss) = &self.expected_issuer {
            validation.set_issuer(&[iss]);
        }
        match &self.expected_audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("expected_issuer", &self.expected_issuer)
            .field("expected_audience", &self.expected_audience)
            .finish()
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims> {
        let token_data = decode::<serde_json::Value>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &self.validation(),
        )
        .map_err(|e| {
            warn!(error = %e, "token verification failed");
            AuthnError::invalid_token(format!("Token validation failed: {}", e))
        })?;

        Ok(TokenClaims(token_data.claims))
    }
}

/// Decodes the claims segment of a JWT without verifying the signature.
/// Only for reading auxiliary data (an id-token expiry) out of a token that
/// was verified by its issuer when it was stored; never for authentication.
pub fn decode_unverified_claims(token: &str) -> Result<TokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthnError::invalid_token("Invalid token format"));
    }

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AuthnError::invalid_token(format!("Failed to decode token payload: {}", e)))?;

    let claims: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| AuthnError::invalid_token(format!("Failed to parse token claims: {}", e)))?;

    Ok(TokenClaims(claims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-verification-secret-0123456789ab";

    fn sign(claims: &serde_json::Value) -> String {
        encode(
            &Header::new(JWT_ALGORITHM),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_verify_returns_claims() {
        let token = sign(&json!({
            "sub": "user:9",
            "iss": "idp.example.com",
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
            "email": "a@example.com",
        }));

        let verifier = JwtVerifier::new(SECRET).with_issuer("idp.example.com");
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.subject().as_deref(), Some("user:9"));
        assert_eq!(claims.lookup_string("email").as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let token = sign(&json!({
            "sub": "user:9",
            "exp": (Utc::now() - Duration::hours(2)).timestamp(),
        }));
        let result = JwtVerifier::new(SECRET).verify(&token).await;
        assert!(matches!(result, Err(AuthnError::InvalidToken { .. })));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_issuer() {
        let token = sign(&json!({
            "sub": "user:9",
            "iss": "other",
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        }));
        let result = JwtVerifier::new(SECRET)
            .with_issuer("idp.example.com")
            .verify(&token)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_signature() {
        let token = sign(&json!({
            "sub": "user:9",
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        }));
        let result = JwtVerifier::new("a-completely-different-secret-value!")
            .verify(&token)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_unverified_decode_reads_expiry() {
        let exp = (Utc::now() + Duration::minutes(5)).timestamp();
        let token = sign(&json!({ "sub": "user:1", "exp": exp }));

        let claims = decode_unverified_claims(&token).unwrap();
        assert_eq!(claims.expiry().unwrap().timestamp(), exp);
        assert!(decode_unverified_claims("no-dots-here").is_err());
    }
}

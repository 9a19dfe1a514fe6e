//! Downstream identity-token minting
//!
//! Signs a short-lived token describing the resolved identity, for
//! forwarding to plugins and internal services that should not see the
//! first-party session or the provider tokens.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use warden_core::{AuthnError, Identity, Result};

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Namespaced identity id, `type:raw`.
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    pub namespace: String,
    /// Module that authenticated the subject.
    pub auth_module: String,
}

#[derive(Debug, Clone)]
pub struct SignedIdToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs identity tokens with a deployment-wide shared secret.
#[derive(Clone)]
pub struct IdTokenSigner {
    secret: String,
    issuer: String,
    token_ttl_secs: i64,
}

impl IdTokenSigner {
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>, token_ttl_secs: i64) -> Self {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LENGTH {
            warn!(
                "identity token secret is only {} bytes, recommended minimum is {} bytes for HS256",
                secret.len(),
                MIN_SECRET_LENGTH
            );
        }
        Self {
            secret,
            issuer: issuer.into(),
            token_ttl_secs,
        }
    }

    #[instrument(skip(self, identity))]
    pub fn sign(&self, identity: &Identity) -> Result<SignedIdToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.token_ttl_secs);

        let claims = IdTokenClaims {
            sub: identity.id.to_string(),
            iss: self.issuer.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            email: (!identity.email.is_empty()).then(|| identity.email.clone()),
            login: (!identity.login.is_empty()).then(|| identity.login.clone()),
            namespace: identity.namespace.clone(),
            auth_module: identity.authenticated_by.clone(),
        };

        let token = encode(
            &Header::new(JWT_ALGORITHM),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthnError::internal(format!("Failed to encode identity token: {}", e)))?;

        debug!(subject = %claims.sub, "signed identity token");
        // Truncate to whole seconds so the value matches the claim.
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(expires_at);
        Ok(SignedIdToken { token, expires_at })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

impl std::fmt::Debug for IdTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenSigner")
            .field("issuer", &self.issuer)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

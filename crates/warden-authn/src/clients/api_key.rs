//! API key client
//!
//! Accepts keys as `Authorization: Bearer wdn_...` or as basic auth with
//! the reserved username `api_key`. Keys resolve either to a standalone
//! key identity or to the service account they belong to.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;

use warden_core::{
    auth_module, ApiKeyService, AuthnError, ClientParams, Identity, Request, Result, TypedId,
};

use super::{basic_credentials, bearer_token, client_name, priority, AuthnClient};

/// Prefix carried by generated key secrets.
const KEY_PREFIX: &str = "wdn_";
/// Basic-auth username reserved for presenting an API key as the password.
const BASIC_KEY_USERNAME: &str = "api_key";

pub struct ApiKeyClient {
    keys: Arc<dyn ApiKeyService>,
}

impl ApiKeyClient {
    pub fn new(keys: Arc<dyn ApiKeyService>) -> Self {
        Self { keys }
    }

    fn key_from_request(req: &Request) -> Option<String> {
        if let Some(token) = bearer_token(req) {
            if token.starts_with(KEY_PREFIX) {
                return Some(token.to_string());
            }
        }
        match basic_credentials(req) {
            Some((user, pass)) if user == BASIC_KEY_USERNAME => Some(pass),
            _ => None,
        }
    }
}

#[async_trait]
impl AuthnClient for ApiKeyClient {
    fn name(&self) -> &str {
        client_name::API_KEY
    }

    fn test(&self, req: &Request) -> bool {
        Self::key_from_request(req).is_some()
    }

    #[instrument(skip(self, req))]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let secret = Self::key_from_request(req)
            .ok_or_else(|| AuthnError::invalid_token("no api key in request"))?;

        let hash = hex::encode(Sha256::digest(secret.as_bytes()));
        let key = self.keys.get_key_by_hash(&hash).await?;

        if key.is_revoked {
            return Err(AuthnError::invalid_token("api key is revoked"));
        }
        if let Some(expires_at) = key.expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthnError::invalid_token("api key has expired"));
            }
        }

        let id = match key.service_account_id {
            Some(sa) => TypedId::service_account(sa),
            None => TypedId::api_key(key.id),
        };
        let mut identity = Identity::new(id);
        identity.org_id = key.org_id;
        identity.org_roles.insert(key.org_id, key.role);
        identity.authenticated_by = auth_module::API_KEY.to_string();
        identity.client_params = ClientParams {
            sync_permissions: true,
            ..ClientParams::default()
        };
        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::API_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use http::Method;
    use warden_core::{ApiKey, OrgRole};

    struct OneKeyStore {
        key: ApiKey,
        secret_hash: String,
    }

    impl OneKeyStore {
        fn with_secret(secret: &str, key: ApiKey) -> Self {
            Self {
                key,
                secret_hash: hex::encode(Sha256::digest(secret.as_bytes())),
            }
        }
    }

    #[async_trait]
    impl ApiKeyService for OneKeyStore {
        async fn get_key_by_hash(&self, hash: &str) -> Result<ApiKey> {
            if hash == self.secret_hash {
                Ok(self.key.clone())
            } else {
                Err(AuthnError::identity_not_found("api key not found"))
            }
        }
    }

    fn api_key() -> ApiKey {
        ApiKey {
            id: 5,
            org_id: 2,
            role: OrgRole::Editor,
            service_account_id: None,
            is_revoked: false,
            expires_at: None,
        }
    }

    fn bearer_request(secret: &str) -> Request {
        Request::new(Method::GET, "/api/search")
            .with_header(http::header::AUTHORIZATION, &format!("Bearer {secret}"))
    }

    #[tokio::test]
    async fn test_probe_matches_prefixed_bearer_and_reserved_basic_user() {
        let client = ApiKeyClient::new(Arc::new(OneKeyStore::with_secret("wdn_abc", api_key())));

        assert!(client.test(&bearer_request("wdn_abc")));
        // A JWT-shaped bearer token is not an API key.
        assert!(!client.test(&bearer_request("eyJh.eyJz.c2ln")));

        let basic = STANDARD.encode("api_key:wdn_abc");
        let req = Request::new(Method::GET, "/")
            .with_header(http::header::AUTHORIZATION, &format!("Basic {basic}"));
        assert!(client.test(&req));

        let basic = STANDARD.encode("alice:hunter2");
        let req = Request::new(Method::GET, "/")
            .with_header(http::header::AUTHORIZATION, &format!("Basic {basic}"));
        assert!(!client.test(&req));
    }

    #[tokio::test]
    async fn test_standalone_key_identity() {
        let client = ApiKeyClient::new(Arc::new(OneKeyStore::with_secret("wdn_abc", api_key())));

        let identity = client.authenticate(&bearer_request("wdn_abc")).await.unwrap();

        assert_eq!(identity.id.to_string(), "api-key:5");
        assert_eq!(identity.org_id, 2);
        assert_eq!(identity.role(), Some(OrgRole::Editor));
        assert_eq!(identity.authenticated_by, auth_module::API_KEY);
    }

    #[tokio::test]
    async fn test_service_account_key_resolves_to_service_account() {
        let mut key = api_key();
        key.service_account_id = Some(31);
        let client = ApiKeyClient::new(Arc::new(OneKeyStore::with_secret("wdn_abc", key)));

        let identity = client.authenticate(&bearer_request("wdn_abc")).await.unwrap();
        assert_eq!(identity.id.to_string(), "service-account:31");
    }

    #[tokio::test]
    async fn test_revoked_and_expired_keys_are_rejected() {
        let mut revoked = api_key();
        revoked.is_revoked = true;
        let client = ApiKeyClient::new(Arc::new(OneKeyStore::with_secret("wdn_abc", revoked)));
        let err = client.authenticate(&bearer_request("wdn_abc")).await.unwrap_err();
        assert!(matches!(err, AuthnError::InvalidToken { .. }));

        let mut expired = api_key();
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let client = ApiKeyClient::new(Arc::new(OneKeyStore::with_secret("wdn_abc", expired)));
        let err = client.authenticate(&bearer_request("wdn_abc")).await.unwrap_err();
        assert!(matches!(err, AuthnError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn test_unknown_key_not_found() {
        let client = ApiKeyClient::new(Arc::new(OneKeyStore::with_secret("wdn_abc", api_key())));
        let err = client.authenticate(&bearer_request("wdn_other")).await.unwrap_err();
        assert!(matches!(err, AuthnError::IdentityNotFound { .. }));
    }
}

//! HTTP basic auth client
//!
//! Front-end over the password composite for `Authorization: Basic`. The
//! API-key client sits at a lower priority number and claims the reserved
//! `api_key` username before this client is probed.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{AuthnError, Identity, Request, Result};

use super::password::PasswordClient;
use super::{basic_credentials, client_name, priority, AuthnClient};

pub struct BasicClient {
    password: Arc<PasswordClient>,
}

impl BasicClient {
    pub fn new(password: Arc<PasswordClient>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthnClient for BasicClient {
    fn name(&self) -> &str {
        client_name::BASIC
    }

    fn test(&self, req: &Request) -> bool {
        req.header(http::header::AUTHORIZATION)
            .map(|h| h.starts_with("Basic "))
            .unwrap_or(false)
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let (username, password) = basic_credentials(req)
            .ok_or_else(|| AuthnError::bad_request("malformed basic auth header"))?;
        self.password
            .authenticate_password(req, &username, &password)
            .await
    }

    fn priority(&self) -> u32 {
        priority::BASIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use http::Method;
    use warden_core::{LoginAttemptService, TypedId};

    struct NoLockout;

    #[async_trait]
    impl LoginAttemptService for NoLockout {
        async fn validate(&self, _username: &str, _client_ip: &str) -> Result<()> {
            Ok(())
        }
        async fn record_failure(&self, _username: &str, _client_ip: &str) -> Result<()> {
            Ok(())
        }
        async fn reset(&self, _username: &str, _client_ip: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FixedBackend;

    #[async_trait]
    impl super::super::PasswordSubClient for FixedBackend {
        fn name(&self) -> &str {
            "database"
        }
        async fn authenticate_password(
            &self,
            _req: &Request,
            username: &str,
            password: &str,
        ) -> Result<Identity> {
            if username == "alice" && password == "secret" {
                Ok(Identity::new(TypedId::user(1)))
            } else {
                Err(AuthnError::invalid_credentials("wrong password"))
            }
        }
    }

    fn client() -> BasicClient {
        let mut password = PasswordClient::new(Arc::new(NoLockout));
        password.register(Arc::new(FixedBackend));
        BasicClient::new(Arc::new(password))
    }

    fn basic_request(credentials: &str) -> Request {
        let encoded = STANDARD.encode(credentials);
        Request::new(Method::GET, "/api/search")
            .with_header(http::header::AUTHORIZATION, &format!("Basic {encoded}"))
    }

    #[tokio::test]
    async fn test_probe_matches_basic_scheme_only() {
        let client = client();
        assert!(client.test(&basic_request("alice:secret")));

        let bearer = Request::new(Method::GET, "/")
            .with_header(http::header::AUTHORIZATION, "Bearer tok");
        assert!(!client.test(&bearer));
        assert!(!client.test(&Request::new(Method::GET, "/")));
    }

    #[tokio::test]
    async fn test_delegates_to_password_composite() {
        let identity = client()
            .authenticate(&basic_request("alice:secret"))
            .await
            .unwrap();
        assert_eq!(identity.user_id(), Some(1));

        let err = client()
            .authenticate(&basic_request("alice:wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.public_message(), "invalid username or password");
    }
}

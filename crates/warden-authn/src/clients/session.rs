//! Session cookie client

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use warden_core::{
    auth_module, AuthnError, ClientParams, Identity, Request, Result, SessionTokenService, TypedId,
};

use super::{client_name, priority, AuthnClient};

pub struct SessionClient {
    session_tokens: Arc<dyn SessionTokenService>,
    cookie_name: String,
    rotation_interval: chrono::Duration,
}

impl SessionClient {
    pub fn new(
        session_tokens: Arc<dyn SessionTokenService>,
        cookie_name: impl Into<String>,
        rotation_interval: chrono::Duration,
    ) -> Self {
        Self {
            session_tokens,
            cookie_name: cookie_name.into(),
            rotation_interval,
        }
    }
}

#[async_trait]
impl AuthnClient for SessionClient {
    fn name(&self) -> &str {
        client_name::SESSION
    }

    fn test(&self, req: &Request) -> bool {
        req.cookie(&self.cookie_name)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    #[instrument(skip(self, req))]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let raw = req
            .cookie(&self.cookie_name)
            .ok_or_else(|| AuthnError::invalid_session_token("no session cookie"))?;
        let unescaped = urlencoding::decode(&raw)
            .map_err(|_| AuthnError::invalid_session_token("malformed session cookie"))?;

        let token = self.session_tokens.lookup_token(&unescaped).await?;
        if token.is_revoked() {
            return Err(AuthnError::invalid_session_token("session token is revoked"));
        }

        // Hard stop: a token overdue for rotation is not trusted, the
        // caller must rotate it and retry.
        if token.needs_rotation(self.rotation_interval) {
            debug!(user_id = token.user_id, "session token needs rotation");
            return Err(AuthnError::TokenNeedsRotation);
        }

        let mut identity = Identity::new(TypedId::user(token.user_id));
        identity.authenticated_by = auth_module::SESSION.to_string();
        identity.client_params = ClientParams {
            fetch_synced_user: true,
            sync_permissions: true,
            ..ClientParams::default()
        };
        identity.session_token = Some(token);
        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::SESSION
    }
}

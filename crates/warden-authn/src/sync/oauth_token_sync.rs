//! Stored OAuth token upkeep for session-authenticated users
//!
//! Session-cookie logins that originated at an OAuth provider carry no
//! provider token on the request; the stored bundle must be kept fresh
//! behind the scenes. A refresh that fails for real tears the session
//! down: the stored tokens are cleared, the first-party session token is
//! hard-revoked, and the request fails with an expired-access-token error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

use warden_core::{
    auth_module, AuthInfoQuery, AuthInfoService, AuthnError, Identity, IdentityType,
    OAuthConnector, Request, Result, SessionTokenService, SetAuthInfoCommand,
};
use warden_oauth::{needs_refresh, TokenRefresher};

use super::SyncHook;

pub struct OAuthTokenSync {
    auth_info: Arc<dyn AuthInfoService>,
    session_tokens: Arc<dyn SessionTokenService>,
    refresher: Arc<TokenRefresher>,
    /// Configured providers, keyed by provider name.
    connectors: HashMap<String, Arc<dyn OAuthConnector>>,
}

impl OAuthTokenSync {
    pub fn new(
        auth_info: Arc<dyn AuthInfoService>,
        session_tokens: Arc<dyn SessionTokenService>,
        refresher: Arc<TokenRefresher>,
        connectors: HashMap<String, Arc<dyn OAuthConnector>>,
    ) -> Self {
        Self {
            auth_info,
            session_tokens,
            refresher,
            connectors,
        }
    }
}

#[async_trait]
impl SyncHook for OAuthTokenSync {
    fn name(&self) -> &'static str {
        "sync.oauth-token"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        if identity.id_type() != IdentityType::User {
            return Ok(());
        }
        // Only session-resumed requests need upkeep; login flows carry a
        // token fresh from the provider.
        let Some(session_token) = identity.session_token.clone() else {
            return Ok(());
        };
        let Some(user_id) = identity.user_id() else {
            return Ok(());
        };

        let row = match self
            .auth_info
            .get_auth_info(&AuthInfoQuery {
                user_id: Some(user_id),
                ..AuthInfoQuery::default()
            })
            .await?
        {
            Some(row) if auth_module::is_oauth(&row.auth_module) => row,
            _ => return Ok(()),
        };

        // Cheap check before the singleflight/lock machinery.
        if !needs_refresh(&row.oauth_token()) {
            return Ok(());
        }

        let provider = auth_module::oauth_provider(&row.auth_module).unwrap_or_default();
        let Some(connector) = self.connectors.get(provider) else {
            warn!(provider, "no connector configured for stored oauth tokens, skipping refresh");
            return Ok(());
        };

        match self
            .refresher
            .try_refresh(
                Arc::clone(connector),
                &identity.id,
                &row.auth_module,
                Some(&session_token),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(AuthnError::Canceled) => Ok(()),
            Err(e) => {
                warn!(error = %e, user_id, "token refresh failed, revoking session");
                if let Err(e) = self
                    .auth_info
                    .update_auth_info(&SetAuthInfoCommand {
                        user_id,
                        auth_module: row.auth_module.clone(),
                        auth_id: row.auth_id.clone(),
                        oauth_token: None,
                    })
                    .await
                {
                    warn!(error = %e, user_id, "failed to clear stored oauth tokens");
                }
                if let Err(e) = self.session_tokens.revoke_token(&session_token, false).await {
                    warn!(error = %e, user_id, "failed to revoke session token");
                }
                Err(AuthnError::ExpiredAccessToken)
            }
        }
    }
}

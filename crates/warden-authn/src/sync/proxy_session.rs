//! First-party session minting for proxy-authenticated users
//!
//! With the login-token option on, a user arriving through the trusted
//! proxy gets a regular session cookie, so later requests resolve through
//! the session client without re-presenting proxy headers.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use warden_core::{
    auth_module, CreateTokenCommand, Identity, IdentityType, Request, Result, SessionTokenService,
};

use crate::config::ProxySettings;

use super::SyncHook;

pub struct ProxySessionSync {
    settings: ProxySettings,
    session_tokens: Arc<dyn SessionTokenService>,
}

impl ProxySessionSync {
    pub fn new(settings: ProxySettings, session_tokens: Arc<dyn SessionTokenService>) -> Self {
        Self {
            settings,
            session_tokens,
        }
    }
}

#[async_trait]
impl SyncHook for ProxySessionSync {
    fn name(&self) -> &'static str {
        "sync.proxy-session"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, req: &Request) -> Result<()> {
        if !self.settings.enable_login_token
            || identity.id_type() != IdentityType::User
            || !identity.is_authenticated_by(&[auth_module::PROXY])
            || identity.session_token.is_some()
        {
            return Ok(());
        }

        let Some(user_id) = identity.user_id() else {
            warn!("proxy identity has no resolved account, skipping session mint");
            return Ok(());
        };

        let token = self
            .session_tokens
            .create_token(&CreateTokenCommand {
                user_id,
                client_ip: req.client_ip.clone(),
                user_agent: req.user_agent.clone(),
                external_session: None,
            })
            .await?;

        info!(user_id, "minted session token for proxy login");
        identity.session_token = Some(token);
        Ok(())
    }
}

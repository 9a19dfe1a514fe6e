//! OAuth2 authorization-code client
//!
//! Redirect phase: random state, its keyed hash stored in a cookie, and an
//! optional PKCE verifier in a second cookie with the derived challenge
//! sent along to the provider. Callback phase: the returned state is
//! re-hashed and compared against the cookie before the code is exchanged.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use warden_core::{
    auth_module, AuthnError, ClientParams, CookieInstruction, ExternalUserInfo, Identity,
    OAuthConnector, OrgRole, Redirect, Request, Result,
};
use warden_oauth::{generate_pkce_verifier, generate_state, hash_state, pkce_challenge, verify_state};

use super::{client_name, priority, AuthnClient, RedirectClient, SERVER_ADMIN_ROLE};

pub const OAUTH_STATE_COOKIE: &str = "oauth_state";
pub const OAUTH_PKCE_COOKIE: &str = "oauth_code_verifier";

/// Lifetime of the state and verifier cookies; the flow must complete
/// within it.
const FLOW_COOKIE_MAX_AGE_SECONDS: i64 = 600;

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    /// Deployment-wide secret mixed into the state hash.
    pub signing_secret: String,
    /// Provider client secret, the second ingredient of the state hash.
    pub client_secret: String,
    pub use_pkce: bool,
    pub allow_sign_up: bool,
    pub skip_org_role_sync: bool,
    /// Email domains allowed to sign in. Empty allows every domain.
    pub allowed_domains: Vec<String>,
    /// Org that provider-reported roles apply to.
    pub auto_assign_org_id: i64,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            client_secret: String::new(),
            use_pkce: true,
            allow_sign_up: true,
            skip_org_role_sync: false,
            allowed_domains: Vec::new(),
            auto_assign_org_id: 1,
        }
    }
}

pub struct OAuthClient {
    name: String,
    module: String,
    provider: String,
    connector: Arc<dyn OAuthConnector>,
    config: OAuthClientConfig,
}

impl OAuthClient {
    pub fn new(connector: Arc<dyn OAuthConnector>, config: OAuthClientConfig) -> Self {
        let provider = connector.name().to_string();
        Self {
            name: client_name::oauth(&provider),
            module: auth_module::oauth(&provider),
            provider,
            connector,
            config,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    fn email_allowed(&self, email: &str) -> bool {
        if self.config.allowed_domains.is_empty() {
            return true;
        }
        email
            .rsplit_once('@')
            .map(|(_, domain)| {
                self.config
                    .allowed_domains
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(domain))
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl AuthnClient for OAuthClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, req: &Request) -> bool {
        req.path.ends_with(&format!("/login/{}", self.provider))
    }

    #[instrument(skip(self, req), fields(provider = %self.provider))]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let state = req
            .query_param("state")
            .filter(|s| !s.is_empty())
            .ok_or(AuthnError::MissingState)?;
        let state_cookie = req
            .cookie(OAUTH_STATE_COOKIE)
            .filter(|c| !c.is_empty())
            .ok_or(AuthnError::MissingState)?;

        if !verify_state(
            &state_cookie,
            &state,
            &self.config.signing_secret,
            &self.config.client_secret,
        ) {
            return Err(AuthnError::StateMismatch);
        }

        let code = req
            .query_param("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthnError::missing_attribute("code"))?;

        let verifier = if self.config.use_pkce {
            Some(
                req.cookie(OAUTH_PKCE_COOKIE)
                    .filter(|v| !v.is_empty())
                    .ok_or(AuthnError::MissingPkceVerifier)?,
            )
        } else {
            None
        };

        let token = self.connector.exchange(&code, verifier.as_deref()).await?;
        let info = self.connector.user_info(&token).await?;

        if info.email.is_empty() {
            return Err(AuthnError::missing_attribute("email"));
        }
        if !self.email_allowed(&info.email) {
            return Err(AuthnError::email_not_allowed(&info.email));
        }
        debug!(subject = %info.subject, "provider user info fetched");

        let mut org_roles = HashMap::new();
        let mut is_server_admin = None;
        match info.role.as_deref() {
            Some(SERVER_ADMIN_ROLE) => {
                is_server_admin = Some(true);
                org_roles.insert(self.config.auto_assign_org_id, OrgRole::Admin);
            }
            Some(role) => {
                if let Ok(role) = role.parse::<OrgRole>() {
                    org_roles.insert(self.config.auto_assign_org_id, role);
                }
            }
            None => {}
        }

        let external = ExternalUserInfo {
            auth_module: self.module.clone(),
            auth_id: info.subject.clone(),
            user_id: None,
            email: info.email.clone(),
            login: if info.login.is_empty() {
                info.email.clone()
            } else {
                info.login.clone()
            },
            name: info.name.clone(),
            groups: info.groups.clone(),
            org_roles,
            is_server_admin,
            is_disabled: false,
        };

        let mut identity = Identity::from_external(
            &external,
            ClientParams {
                sync_user: true,
                allow_sign_up: self.config.allow_sign_up,
                fetch_synced_user: true,
                sync_permissions: true,
                sync_org_roles: !self.config.skip_org_role_sync,
                sync_teams: !info.groups.is_empty(),
                ..ClientParams::default()
            },
        );
        identity.oauth_token = Some(token);
        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::OAUTH
    }
}

#[async_trait]
impl RedirectClient for OAuthClient {
    async fn redirect_url(&self, _req: &Request) -> Result<Redirect> {
        let state = generate_state();
        let hashed = hash_state(
            &state,
            &self.config.signing_secret,
            &self.config.client_secret,
        );

        let mut cookies = vec![CookieInstruction::set(
            OAUTH_STATE_COOKIE,
            hashed,
            FLOW_COOKIE_MAX_AGE_SECONDS,
        )];

        let challenge = if self.config.use_pkce {
            let verifier = generate_pkce_verifier();
            let challenge = pkce_challenge(&verifier);
            cookies.push(CookieInstruction::set(
                OAUTH_PKCE_COOKIE,
                verifier,
                FLOW_COOKIE_MAX_AGE_SECONDS,
            ));
            Some(challenge)
        } else {
            None
        };

        Ok(Redirect {
            url: self.connector.auth_code_url(&state, challenge.as_deref()),
            cookies,
        })
    }
}

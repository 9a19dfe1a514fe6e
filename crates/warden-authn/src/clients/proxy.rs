//! Auth proxy client
//!
//! Trusts identity headers set by a fronting reverse proxy, but only from
//! addresses on the accept list. One set of headers is trusted for
//! `sync_ttl_mins` before the account is re-synced; the cache maps a hash
//! of the header values to the resolved account id and is primed by a
//! pipeline hook once user sync has settled the id.

use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use warden_core::{
    auth_module, AuthnError, ClientParams, ExternalUserInfo, Identity, IdentityType, LdapService,
    OrgRole, Request, Result, TypedId,
};

use crate::config::ProxySettings;
use crate::sync::SyncHook;

use super::{client_name, priority, AuthnClient};

pub struct ProxyClient {
    settings: ProxySettings,
    /// Optional directory used to resolve the full profile instead of
    /// trusting attribute headers.
    directory: Option<Arc<dyn LdapService>>,
    cache: Cache<String, i64>,
}

impl ProxyClient {
    pub fn new(settings: ProxySettings, directory: Option<Arc<dyn LdapService>>) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(settings.sync_ttl_mins * 60))
            .build();
        Self {
            settings,
            directory,
            cache,
        }
    }

    pub fn enable_login_token(&self) -> bool {
        self.settings.enable_login_token
    }

    fn source_allowed(&self, client_ip: &str) -> bool {
        self.settings.accept_from.is_empty()
            || self.settings.accept_from.iter().any(|a| a == client_ip)
    }

    /// Cache key over every trusted header value, so any attribute change
    /// forces a re-sync.
    fn cache_key(&self, req: &Request) -> String {
        let mut hasher = Sha256::new();
        if let Some(main) = req.header_str(&self.settings.header_name) {
            hasher.update(main.as_bytes());
        }
        let mut extra: Vec<_> = self.settings.headers.iter().collect();
        extra.sort_by_key(|(attribute, _)| attribute.as_str());
        for (_, header) in extra {
            hasher.update(b"\x1f");
            hasher.update(req.header_str(header).unwrap_or_default().as_bytes());
        }
        format!("authproxy:{}", hex::encode(hasher.finalize()))
    }

    fn info_from_headers(&self, req: &Request, main: &str) -> ExternalUserInfo {
        let mut info = ExternalUserInfo {
            auth_module: auth_module::PROXY.to_string(),
            auth_id: main.to_string(),
            ..ExternalUserInfo::default()
        };
        match self.settings.header_property.as_str() {
            "email" => {
                info.email = main.to_string();
                info.login = main.to_string();
            }
            _ => info.login = main.to_string(),
        }

        for (attribute, header) in &self.settings.headers {
            let Some(value) = req.header_str(header).filter(|v| !v.is_empty()) else {
                continue;
            };
            match attribute.as_str() {
                "Name" => info.name = value.to_string(),
                "Email" => info.email = value.to_string(),
                "Login" => info.login = value.to_string(),
                "Role" => {
                    if let Ok(role) = value.parse::<OrgRole>() {
                        info.org_roles.insert(1, role);
                    }
                }
                "Groups" => {
                    info.groups = value.split(',').map(|g| g.trim().to_string()).collect();
                }
                _ => {}
            }
        }
        info
    }
}

#[async_trait]
impl AuthnClient for ProxyClient {
    fn name(&self) -> &str {
        client_name::PROXY
    }

    fn test(&self, req: &Request) -> bool {
        self.settings.enabled
            && req
                .header_str(&self.settings.header_name)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        if !self.source_allowed(&req.client_ip) {
            return Err(AuthnError::forbidden(format!(
                "proxy authentication not accepted from {}",
                req.client_ip
            )));
        }

        let main = req
            .header_str(&self.settings.header_name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthnError::invalid_credentials("proxy header is empty"))?
            .to_string();

        let info = match &self.directory {
            Some(directory) => directory.get_user(&main).await?,
            None => self.info_from_headers(req, &main),
        };

        let mut identity = Identity::from_external(
            &info,
            ClientParams {
                sync_user: true,
                allow_sign_up: true,
                fetch_synced_user: true,
                sync_permissions: true,
                sync_org_roles: !info.org_roles.is_empty(),
                sync_teams: !info.groups.is_empty(),
                ..ClientParams::default()
            },
        );

        // Within the TTL the previous sync still stands.
        if let Some(user_id) = self.cache.get(&self.cache_key(req)).await {
            debug!(user_id, "proxy headers found in cache, skipping sync");
            identity.id = TypedId::user(user_id);
            identity.client_params.sync_user = false;
        }

        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::PROXY
    }
}

/// Stores the synced account id under the header hash, so follow-up
/// requests with identical headers skip user sync until the TTL lapses.
pub struct ProxyCachePrimer {
    client: Arc<ProxyClient>,
}

impl ProxyCachePrimer {
    pub fn new(client: Arc<ProxyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncHook for ProxyCachePrimer {
    fn name(&self) -> &'static str {
        "sync.proxy-cache"
    }

    async fn run(&self, identity: &mut Identity, req: &Request) -> Result<()> {
        if !identity.is_authenticated_by(&[auth_module::PROXY]) {
            return Ok(());
        }
        if !identity.client_params.sync_user || identity.id_type() != IdentityType::User {
            return Ok(());
        }
        let Some(user_id) = identity.user_id() else {
            return Ok(());
        };
        self.client
            .cache
            .insert(self.client.cache_key(req), user_id)
            .await;
        Ok(())
    }
}

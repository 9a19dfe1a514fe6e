//! LDAP password backend
//!
//! Thin wrapper over the directory service: the directory speaks the bind
//! protocol and maps entries to [`ExternalUserInfo`]; this client turns
//! that into an identity with the right sync hints.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{ClientParams, ExternalUserInfo, Identity, LdapService, Request, Result};

use super::PasswordSubClient;

/// Sync behavior shared by directory-style backends (LDAP, RADIUS, proxy).
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub allow_sign_up: bool,
    /// Leave internally managed org membership alone even when the
    /// directory supplies org roles.
    pub skip_org_role_sync: bool,
    pub sync_teams: bool,
    pub enable_disabled_users: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            allow_sign_up: true,
            skip_org_role_sync: false,
            sync_teams: false,
            enable_disabled_users: false,
        }
    }
}

/// Builds the identity for a directory-authenticated user. Provider org
/// roles are always carried on the identity; `skip_org_role_sync` only
/// controls whether the org sync hook acts on them.
pub(crate) fn identity_from_info(info: &ExternalUserInfo, config: &DirectoryConfig) -> Identity {
    Identity::from_external(
        info,
        ClientParams {
            sync_user: true,
            allow_sign_up: config.allow_sign_up,
            fetch_synced_user: true,
            sync_permissions: true,
            sync_org_roles: !config.skip_org_role_sync,
            sync_teams: config.sync_teams,
            enable_disabled_users: config.enable_disabled_users,
            ..ClientParams::default()
        },
    )
}

pub struct LdapClient {
    directory: Arc<dyn LdapService>,
    config: DirectoryConfig,
}

impl LdapClient {
    pub fn new(directory: Arc<dyn LdapService>, config: DirectoryConfig) -> Self {
        Self { directory, config }
    }
}

#[async_trait]
impl PasswordSubClient for LdapClient {
    fn name(&self) -> &str {
        warden_core::auth_module::LDAP
    }

    #[instrument(skip_all)]
    async fn authenticate_password(
        &self,
        _req: &Request,
        username: &str,
        password: &str,
    ) -> Result<Identity> {
        let info = self.directory.login(username, password).await?;
        Ok(identity_from_info(&info, &self.config))
    }
}

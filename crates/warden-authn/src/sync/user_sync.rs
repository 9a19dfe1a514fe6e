//! Backing-account sync
//!
//! Resolves the externally authenticated identity to a persisted account,
//! creating or updating it as the client allows, then writes the settled
//! account back onto the identity. Every later hook trusts the id this
//! hook resolved.
//!
//! Resolution order: the provider-connection row for
//! `(auth_module, auth_id)` first, then the client's lookup params
//! (id, email, login). A connection row pointing at a deleted account is
//! discarded and resolution falls through.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use warden_core::{
    AuthInfoQuery, AuthInfoService, AuthnError, CreateUserCommand, Identity, IdentityType,
    QuotaScope, QuotaService, Request, Result, SetAuthInfoCommand, TypedId, UpdateUserCommand,
    User, UserService,
};

use super::SyncHook;

pub struct UserSync {
    users: Arc<dyn UserService>,
    auth_info: Arc<dyn AuthInfoService>,
    quota: Arc<dyn QuotaService>,
}

impl UserSync {
    pub fn new(
        users: Arc<dyn UserService>,
        auth_info: Arc<dyn AuthInfoService>,
        quota: Arc<dyn QuotaService>,
    ) -> Self {
        Self {
            users,
            auth_info,
            quota,
        }
    }

    async fn resolve(&self, identity: &Identity) -> Result<Option<User>> {
        if !identity.authenticated_by.is_empty() && !identity.auth_id.is_empty() {
            let query = AuthInfoQuery {
                auth_module: Some(identity.authenticated_by.clone()),
                auth_id: Some(identity.auth_id.clone()),
                ..AuthInfoQuery::default()
            };
            if let Some(row) = self.auth_info.get_auth_info(&query).await? {
                match self.users.get_by_id(row.user_id).await {
                    Ok(user) => return Ok(Some(user)),
                    Err(AuthnError::IdentityNotFound { .. }) => {
                        warn!(
                            user_id = row.user_id,
                            auth_module = %row.auth_module,
                            "auth info row references a missing account, discarding"
                        );
                        self.auth_info.delete_user_auth_info(row.user_id).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let lookup = &identity.client_params.lookup_params;
        if let Some(user_id) = lookup.user_id {
            match self.users.get_by_id(user_id).await {
                Ok(user) => return Ok(Some(user)),
                Err(AuthnError::IdentityNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(email) = lookup.email.as_deref().filter(|e| !e.is_empty()) {
            match self.users.get_by_email(email).await {
                Ok(user) => return Ok(Some(user)),
                Err(AuthnError::IdentityNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(login) = lookup.login.as_deref().filter(|l| !l.is_empty()) {
            match self.users.get_by_login(login).await {
                Ok(user) => return Ok(Some(user)),
                Err(AuthnError::IdentityNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn create(&self, identity: &Identity) -> Result<User> {
        if self.quota.check_quota_reached(QuotaScope::User).await? {
            return Err(AuthnError::quota_reached("user"));
        }
        if identity.org_id > 0
            && self
                .quota
                .check_quota_reached(QuotaScope::OrgUser(identity.org_id))
                .await?
        {
            return Err(AuthnError::quota_reached("org_user"));
        }

        let login = if identity.login.is_empty() {
            identity.email.clone()
        } else {
            identity.login.clone()
        };
        let user = self
            .users
            .create(&CreateUserCommand {
                login,
                email: identity.email.clone(),
                name: identity.name.clone(),
                email_verified: identity.email_verified,
                is_server_admin: identity.is_server_admin.unwrap_or(false),
                org_id: (identity.org_id > 0).then_some(identity.org_id),
            })
            .await?;
        info!(
            user_id = user.id,
            auth_module = %identity.authenticated_by,
            "created account from external identity"
        );
        Ok(user)
    }

    /// Pushes changed external attributes into the store, mirroring each
    /// change onto the in-memory copy.
    async fn update_changed(&self, user: &mut User, identity: &Identity) -> Result<()> {
        let mut cmd = UpdateUserCommand {
            user_id: user.id,
            ..UpdateUserCommand::default()
        };
        let mut changed = false;

        if !identity.login.is_empty() && !identity.login.eq_ignore_ascii_case(&user.login) {
            user.login = identity.login.clone();
            cmd.login = Some(identity.login.clone());
            changed = true;
        }
        if !identity.email.is_empty() && !identity.email.eq_ignore_ascii_case(&user.email) {
            user.email = identity.email.clone();
            user.email_verified = identity.email_verified;
            cmd.email = Some(identity.email.clone());
            cmd.email_verified = Some(identity.email_verified);
            changed = true;
        }
        if !identity.name.is_empty() && identity.name != user.name {
            user.name = identity.name.clone();
            cmd.name = Some(identity.name.clone());
            changed = true;
        }
        if let Some(is_admin) = identity.is_server_admin {
            if is_admin != user.is_server_admin {
                user.is_server_admin = is_admin;
                cmd.is_server_admin = Some(is_admin);
                changed = true;
            }
        }

        if changed {
            self.users.update(&cmd).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SyncHook for UserSync {
    fn name(&self) -> &'static str {
        "sync.user"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        if !identity.client_params.sync_user || identity.id_type() != IdentityType::User {
            return Ok(());
        }

        let mut user = match self.resolve(identity).await? {
            Some(mut user) => {
                self.update_changed(&mut user, identity).await?;
                user
            }
            None if identity.client_params.allow_sign_up => self.create(identity).await?,
            None => return Err(AuthnError::SignUpNotAllowed),
        };

        if !identity.authenticated_by.is_empty() && !identity.auth_id.is_empty() {
            self.auth_info
                .set_auth_info(&SetAuthInfoCommand {
                    user_id: user.id,
                    auth_module: identity.authenticated_by.clone(),
                    auth_id: identity.auth_id.clone(),
                    oauth_token: identity.oauth_token.clone(),
                })
                .await?;
        }

        identity.id = TypedId::user(user.id);
        identity.uid = std::mem::take(&mut user.uid);
        identity.login = std::mem::take(&mut user.login);
        identity.email = std::mem::take(&mut user.email);
        identity.name = std::mem::take(&mut user.name);
        identity.email_verified = user.email_verified;
        identity.is_server_admin = Some(user.is_server_admin);
        identity.is_disabled = user.is_disabled;
        identity.last_seen_at = user.last_seen_at;
        Ok(())
    }
}

//! Signed-in snapshot reload
//!
//! Clients that resolve only an account id (session cookie, extended JWT)
//! set `fetch_synced_user`; this hook loads the full signed-in view with
//! the active org resolved server-side. An account disabled since the
//! session was minted is rejected here.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{AuthnError, Identity, IdentityType, Request, Result, UserService};

use super::SyncHook;

pub struct FetchSyncedUserSync {
    users: Arc<dyn UserService>,
}

impl FetchSyncedUserSync {
    pub fn new(users: Arc<dyn UserService>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl SyncHook for FetchSyncedUserSync {
    fn name(&self) -> &'static str {
        "sync.fetch-synced-user"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, req: &Request) -> Result<()> {
        if !identity.client_params.fetch_synced_user || identity.id_type() != IdentityType::User {
            return Ok(());
        }
        let Some(user_id) = identity.user_id() else {
            return Err(AuthnError::unexpected_identity_type(identity.id.to_string()));
        };

        let org_id = match req.org_id() {
            0 => identity.org_id,
            explicit => explicit,
        };
        let snapshot = self.users.get_signed_in_user(user_id, org_id).await?;
        if snapshot.is_disabled {
            return Err(AuthnError::UserDisabled);
        }

        identity.uid = snapshot.uid;
        identity.org_id = snapshot.org_id;
        identity.org_roles = [(snapshot.org_id, snapshot.org_role)].into();
        identity.login = snapshot.login;
        identity.email = snapshot.email;
        identity.name = snapshot.name;
        identity.email_verified = snapshot.email_verified;
        identity.is_server_admin = Some(snapshot.is_server_admin);
        identity.teams = snapshot.teams;
        identity.last_seen_at = snapshot.last_seen_at;
        Ok(())
    }
}

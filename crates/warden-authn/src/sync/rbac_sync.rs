//! Permission fetch and caching
//!
//! Loads the identity's permission set for the active org, grouped by
//! action. A fetch failure surfaces as Forbidden; an identity without
//! permissions must not proceed as if it had some.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

use warden_core::{AccessControlService, AuthnError, Identity, Request, Result};

use super::SyncHook;

pub struct PermissionsSync {
    access_control: Arc<dyn AccessControlService>,
}

impl PermissionsSync {
    pub fn new(access_control: Arc<dyn AccessControlService>) -> Self {
        Self { access_control }
    }
}

#[async_trait]
impl SyncHook for PermissionsSync {
    fn name(&self) -> &'static str {
        "sync.permissions"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        if !identity.client_params.sync_permissions
            || !identity.id_type().has_persisted_record()
        {
            return Ok(());
        }
        if self.access_control.is_disabled() {
            return Ok(());
        }

        let fetched = self
            .access_control
            .get_user_permissions(
                identity.org_id,
                identity,
                identity.client_params.fetch_permissions_params.as_ref(),
            )
            .await
            .map_err(|e| {
                warn!(id = %identity.id, error = %e, "permission fetch failed");
                AuthnError::forbidden("permissions could not be fetched")
            })?;

        let mut by_action: HashMap<String, Vec<String>> = HashMap::new();
        for permission in fetched {
            by_action
                .entry(permission.action)
                .or_default()
                .push(permission.scope);
        }
        identity.permissions.insert(identity.org_id, by_action);
        Ok(())
    }
}

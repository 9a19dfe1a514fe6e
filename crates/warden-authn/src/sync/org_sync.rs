//! Org membership reconciliation
//!
//! Diffs the externally granted org roles against stored membership:
//! changed roles are updated, missing memberships added, revoked ones
//! removed. Removing the last admin of an org is skipped and logged rather
//! than failing the login. The hook is idempotent: a second run with
//! unchanged external roles issues no membership calls.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use warden_core::{
    AccessControlService, AuthnError, Identity, IdentityType, OrgService, Request, Result,
};

use super::SyncHook;

pub struct OrgSync {
    orgs: Arc<dyn OrgService>,
    access_control: Arc<dyn AccessControlService>,
}

impl OrgSync {
    pub fn new(orgs: Arc<dyn OrgService>, access_control: Arc<dyn AccessControlService>) -> Self {
        Self {
            orgs,
            access_control,
        }
    }
}

#[async_trait]
impl SyncHook for OrgSync {
    fn name(&self) -> &'static str {
        "sync.org"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        if !identity.client_params.sync_org_roles || identity.id_type() != IdentityType::User {
            return Ok(());
        }
        // An empty grant set means the provider said nothing about orgs;
        // wiping every membership over silence would lock the account out.
        if identity.org_roles.is_empty() {
            return Ok(());
        }
        let Some(user_id) = identity.user_id() else {
            warn!(id = %identity.id, "org sync expects a resolved user id, skipping");
            return Ok(());
        };

        let memberships = self.orgs.get_user_org_list(user_id).await?;

        let mut handled: HashSet<i64> = HashSet::new();
        let mut to_remove: Vec<i64> = Vec::new();
        for membership in &memberships {
            handled.insert(membership.org_id);
            match identity.org_roles.get(&membership.org_id) {
                Some(role) if *role != membership.role => {
                    self.orgs
                        .update_org_user(membership.org_id, user_id, *role)
                        .await?;
                }
                Some(_) => {}
                None => to_remove.push(membership.org_id),
            }
        }

        for (&org_id, &role) in &identity.org_roles {
            if handled.contains(&org_id) {
                continue;
            }
            match self.orgs.add_org_user(org_id, user_id, role).await {
                Ok(()) => {}
                // The provider may grant orgs this deployment does not have.
                Err(AuthnError::IdentityNotFound { .. }) => {
                    debug!(org_id, "externally granted org does not exist, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        for org_id in to_remove {
            match self.orgs.remove_org_user(org_id, user_id).await {
                Ok(()) => {
                    // Stale cached permissions in the revoked org must not
                    // survive the membership.
                    if let Err(e) = self
                        .access_control
                        .delete_user_permissions(org_id, user_id)
                        .await
                    {
                        warn!(org_id, user_id, error = %e, "failed to drop permissions in revoked org");
                    }
                }
                Err(AuthnError::LastOrgAdmin) => {
                    warn!(
                        org_id,
                        user_id, "revoking membership would remove the last org admin, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if !identity.org_roles.contains_key(&identity.org_id) {
            // Deterministic fallback: lowest granted org id.
            let next_org = identity
                .org_roles
                .keys()
                .min()
                .copied()
                .ok_or_else(|| AuthnError::internal("org roles emptied during sync"))?;
            debug!(from = identity.org_id, to = next_org, "active org no longer granted, switching");
            identity.org_id = next_org;
            self.orgs.set_using_org(user_id, next_org).await?;
        }
        Ok(())
    }
}

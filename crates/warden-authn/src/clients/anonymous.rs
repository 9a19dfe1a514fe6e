//! Anonymous access client
//!
//! Catch-all at the lowest priority. Grants a fixed role in one configured
//! org; the identity has no backing record, so every sync hook skips it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{auth_module, Identity, OrgRole, OrgService, Request, Result, TypedId};

use crate::config::AnonymousSettings;

use super::{client_name, priority, AuthnClient};

pub struct AnonymousClient {
    settings: AnonymousSettings,
    orgs: Arc<dyn OrgService>,
}

impl AnonymousClient {
    pub fn new(settings: AnonymousSettings, orgs: Arc<dyn OrgService>) -> Self {
        Self { settings, orgs }
    }
}

#[async_trait]
impl AuthnClient for AnonymousClient {
    fn name(&self) -> &str {
        client_name::ANONYMOUS
    }

    fn test(&self, _req: &Request) -> bool {
        self.settings.enabled
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, _req: &Request) -> Result<Identity> {
        let org = self.orgs.get_by_name(&self.settings.org_name).await?;
        let role: OrgRole = self.settings.org_role.parse()?;

        let mut identity = Identity::new(TypedId::anonymous());
        identity.org_id = org.id;
        identity.org_roles.insert(org.id, role);
        identity.authenticated_by = auth_module::ANONYMOUS.to_string();
        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::ANONYMOUS
    }
}

//! RADIUS password backend

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{Identity, RadiusService, Request, Result};

use super::ldap::{identity_from_info, DirectoryConfig};
use super::PasswordSubClient;

pub struct RadiusClient {
    radius: Arc<dyn RadiusService>,
    config: DirectoryConfig,
}

impl RadiusClient {
    pub fn new(radius: Arc<dyn RadiusService>, config: DirectoryConfig) -> Self {
        Self { radius, config }
    }
}

#[async_trait]
impl PasswordSubClient for RadiusClient {
    fn name(&self) -> &str {
        warden_core::auth_module::RADIUS
    }

    #[instrument(skip_all)]
    async fn authenticate_password(
        &self,
        _req: &Request,
        username: &str,
        password: &str,
    ) -> Result<Identity> {
        let info = self.radius.login(username, password).await?;
        Ok(identity_from_info(&info, &self.config))
    }
}

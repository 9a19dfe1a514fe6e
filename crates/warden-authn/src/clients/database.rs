//! Local-database password backend

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{
    auth_module, AuthnError, ClientParams, Identity, Request, Result, TypedId, User, UserService,
};

use super::PasswordSubClient;
use crate::password_hash::verify_password_async;

pub struct DatabaseClient {
    users: Arc<dyn UserService>,
}

impl DatabaseClient {
    pub fn new(users: Arc<dyn UserService>) -> Self {
        Self { users }
    }

    async fn lookup(&self, username: &str) -> Result<User> {
        match self.users.get_by_login(username).await {
            Ok(user) => Ok(user),
            Err(AuthnError::IdentityNotFound { .. }) if username.contains('@') => {
                self.users.get_by_email(username).await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PasswordSubClient for DatabaseClient {
    fn name(&self) -> &str {
        auth_module::DATABASE
    }

    #[instrument(skip_all)]
    async fn authenticate_password(
        &self,
        _req: &Request,
        username: &str,
        password: &str,
    ) -> Result<Identity> {
        let user = self.lookup(username).await?;

        // A disabled account must not fall through to another backend.
        if user.is_disabled {
            return Err(AuthnError::UserDisabled);
        }

        if user.password_hash.is_empty() {
            return Err(AuthnError::invalid_credentials(
                "user has no stored password",
            ));
        }
        if !verify_password_async(password.to_string(), user.password_hash.clone()).await {
            return Err(AuthnError::invalid_credentials("wrong password"));
        }

        let mut identity = Identity::new(TypedId::user(user.id));
        identity.uid = user.uid;
        identity.login = user.login;
        identity.email = user.email;
        identity.name = user.name;
        identity.org_id = user.default_org_id;
        identity.is_server_admin = Some(user.is_server_admin);
        identity.authenticated_by = auth_module::PASSWORD.to_string();
        identity.client_params = ClientParams {
            fetch_synced_user: true,
            sync_permissions: true,
            ..ClientParams::default()
        };
        Ok(identity)
    }
}

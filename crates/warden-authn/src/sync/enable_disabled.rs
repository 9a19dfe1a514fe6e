//! Disabled-account re-enable
//!
//! External backends that vouch for an account (LDAP, RADIUS) may opt in to
//! re-enabling it on successful login.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use warden_core::{AuthnError, Identity, IdentityType, Request, Result, UserService};

use super::SyncHook;

pub struct EnableDisabledUserSync {
    users: Arc<dyn UserService>,
}

impl EnableDisabledUserSync {
    pub fn new(users: Arc<dyn UserService>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl SyncHook for EnableDisabledUserSync {
    fn name(&self) -> &'static str {
        "sync.enable-disabled-user"
    }

    #[instrument(skip_all)]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        if !identity.client_params.enable_disabled_users
            || identity.id_type() != IdentityType::User
            || !identity.is_disabled
        {
            return Ok(());
        }
        let user_id = identity
            .user_id()
            .ok_or_else(|| AuthnError::unexpected_identity_type(identity.id.to_string()))?;

        self.users.set_disabled(user_id, false).await?;
        identity.is_disabled = false;
        info!(user_id, "re-enabled account after external authentication");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::Mutex;
    use warden_core::{
        CreateUserCommand, TypedId, UpdateUserCommand, User, UserSnapshot,
    };

    #[derive(Default)]
    struct DisableCalls {
        calls: Mutex<Vec<(i64, bool)>>,
    }

    #[async_trait]
    impl UserService for DisableCalls {
        async fn get_by_id(&self, _user_id: i64) -> Result<User> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn get_by_email(&self, _email: &str) -> Result<User> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn get_by_login(&self, _login: &str) -> Result<User> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn create(&self, _cmd: &CreateUserCommand) -> Result<User> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn update(&self, _cmd: &UpdateUserCommand) -> Result<()> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn update_last_seen_at(&self, _user_id: i64) -> Result<()> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn get_signed_in_user(&self, _user_id: i64, _org_id: i64) -> Result<UserSnapshot> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn set_disabled(&self, user_id: i64, disabled: bool) -> Result<()> {
            self.calls.lock().unwrap().push((user_id, disabled));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reenables_only_flagged_disabled_users() {
        let users = Arc::new(DisableCalls::default());
        let hook = EnableDisabledUserSync::new(Arc::clone(&users) as _);
        let req = Request::new(Method::GET, "/");

        let mut identity = Identity::new(TypedId::user(5));
        identity.is_disabled = true;
        identity.client_params.enable_disabled_users = true;
        hook.run(&mut identity, &req).await.unwrap();
        assert!(!identity.is_disabled);
        assert_eq!(users.calls.lock().unwrap().as_slice(), &[(5, false)]);

        // Not disabled: untouched.
        let mut active = Identity::new(TypedId::user(6));
        active.client_params.enable_disabled_users = true;
        hook.run(&mut active, &req).await.unwrap();

        // Flag not set: untouched even though disabled.
        let mut unflagged = Identity::new(TypedId::user(7));
        unflagged.is_disabled = true;
        hook.run(&mut unflagged, &req).await.unwrap();
        assert!(unflagged.is_disabled);

        assert_eq!(users.calls.lock().unwrap().len(), 1);
    }
}

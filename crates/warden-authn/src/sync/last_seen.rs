//! Debounced last-seen stamping
//!
//! The stamp is advisory metadata, so it goes through the background queue
//! and never costs the request a database round trip. Accounts touched
//! within the debounce window are skipped outright.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::instrument;

use warden_core::{Identity, IdentityType, Request, Result, UserService};

use crate::background::TaskQueue;
use crate::config::BackgroundSettings;

use super::SyncHook;

pub struct LastSeenSync {
    users: Arc<dyn UserService>,
    queue: Arc<TaskQueue>,
    debounce: Duration,
}

impl LastSeenSync {
    pub fn new(
        settings: &BackgroundSettings,
        users: Arc<dyn UserService>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            users,
            queue,
            debounce: Duration::minutes(settings.last_seen_debounce_mins),
        }
    }
}

#[async_trait]
impl SyncHook for LastSeenSync {
    fn name(&self) -> &'static str {
        "sync.last-seen"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        // Service accounts live in the user table, so the same stamp applies.
        if !matches!(
            identity.id_type(),
            IdentityType::User | IdentityType::ServiceAccount
        ) {
            return Ok(());
        }
        let Some(user_id) = identity.user_id() else {
            return Ok(());
        };
        if let Some(seen) = identity.last_seen_at {
            if Utc::now() - seen < self.debounce {
                return Ok(());
            }
        }

        let users = Arc::clone(&self.users);
        self.queue.try_dispatch("last-seen", async move {
            users.update_last_seen_at(user_id).await
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::Mutex;
    use warden_core::{
        AuthnError, CreateUserCommand, TypedId, UpdateUserCommand, User, UserSnapshot,
    };

    #[derive(Default)]
    struct StampCalls {
        stamped: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl UserService for StampCalls {
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
            Ok(())
        }
        async fn update_last_seen_at(&self, user_id: i64) -> Result<()> {
            self.stamped.lock().unwrap().push(user_id);
            Ok(())
        }
        async fn get_signed_in_user(&self, _user_id: i64, _org_id: i64) -> Result<UserSnapshot> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn set_disabled(&self, _user_id: i64, _disabled: bool) -> Result<()> {
            Ok(())
        }
    }

    async fn run_and_drain(users: Arc<StampCalls>, identity: &mut Identity) {
        let queue = Arc::new(TaskQueue::new(1, 8));
        let hook = LastSeenSync::new(
            &BackgroundSettings::default(),
            users,
            Arc::clone(&queue),
        );
        hook.run(identity, &Request::new(Method::GET, "/"))
            .await
            .unwrap();
        drop(hook);
        Arc::try_unwrap(queue).ok().unwrap().shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_account_is_stamped() {
        let users = Arc::new(StampCalls::default());
        let mut identity = Identity::new(TypedId::user(12));
        identity.last_seen_at = Some(Utc::now() - Duration::minutes(30));

        run_and_drain(Arc::clone(&users), &mut identity).await;
        assert_eq!(users.stamped.lock().unwrap().as_slice(), &[12]);
    }

    #[tokio::test]
    async fn test_never_seen_account_is_stamped() {
        let users = Arc::new(StampCalls::default());
        let mut identity = Identity::new(TypedId::user(12));

        run_and_drain(Arc::clone(&users), &mut identity).await;
        assert_eq!(users.stamped.lock().unwrap().as_slice(), &[12]);
    }

    #[tokio::test]
    async fn test_recent_stamp_is_debounced() {
        let users = Arc::new(StampCalls::default());
        let mut identity = Identity::new(TypedId::user(12));
        identity.last_seen_at = Some(Utc::now() - Duration::minutes(1));

        run_and_drain(Arc::clone(&users), &mut identity).await;
        assert!(users.stamped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_is_skipped() {
        let users = Arc::new(StampCalls::default());
        let mut identity = Identity::new(TypedId::anonymous());

        run_and_drain(Arc::clone(&users), &mut identity).await;
        assert!(users.stamped.lock().unwrap().is_empty());
    }
}

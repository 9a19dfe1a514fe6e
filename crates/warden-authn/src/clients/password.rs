//! Password composite client
//!
//! Fans out to ordered backends (database, LDAP, RADIUS). A backend
//! answering invalid-password or identity-not-found passes the turn to the
//! next one; anything else aborts the chain. Callers only ever see one
//! generic failure message, so the response never reveals which backend
//! knew the username or which check failed.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use warden_core::{AuthnError, Identity, LoginAttemptService, Request, Result};

use super::PasswordSubClient;

pub struct PasswordClient {
    login_attempts: Arc<dyn LoginAttemptService>,
    sub_clients: Vec<Arc<dyn PasswordSubClient>>,
}

impl PasswordClient {
    pub fn new(login_attempts: Arc<dyn LoginAttemptService>) -> Self {
        Self {
            login_attempts,
            sub_clients: Vec::new(),
        }
    }

    /// Backends are tried in registration order.
    pub fn register(&mut self, sub_client: Arc<dyn PasswordSubClient>) {
        self.sub_clients.push(sub_client);
    }

    #[instrument(skip_all, fields(username))]
    pub async fn authenticate_password(
        &self,
        req: &Request,
        username: &str,
        password: &str,
    ) -> Result<Identity> {
        // Lockout is checked before any backend sees the credentials.
        self.login_attempts.validate(username, &req.client_ip).await?;

        if password.is_empty() {
            return Err(AuthnError::invalid_credentials("empty password"));
        }

        for sub_client in &self.sub_clients {
            match sub_client.authenticate_password(req, username, password).await {
                Ok(identity) => return Ok(identity),
                Err(AuthnError::InvalidCredentials { message }) => {
                    // A real wrong-password outcome counts against lockout.
                    debug!(backend = sub_client.name(), message, "invalid password");
                    if let Err(e) = self
                        .login_attempts
                        .record_failure(username, &req.client_ip)
                        .await
                    {
                        warn!(error = %e, "failed to record login attempt");
                    }
                }
                Err(AuthnError::IdentityNotFound { message }) => {
                    debug!(backend = sub_client.name(), message, "identity not found");
                }
                Err(err) => {
                    // Not a try-next signal. Abort, wrapped so the caller
                    // cannot distinguish this from a bad credential.
                    warn!(backend = sub_client.name(), error = %err, "password backend failed");
                    return Err(AuthnError::invalid_credentials(format!(
                        "backend {} failed: {err}",
                        sub_client.name()
                    )));
                }
            }
        }

        Err(AuthnError::invalid_credentials(
            "no backend accepted the credentials",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::TypedId;

    struct ScriptedBackend {
        name: &'static str,
        outcome: fn() -> Result<Identity>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, outcome: fn() -> Result<Identity>) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PasswordSubClient for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }
        async fn authenticate_password(
            &self,
            _req: &Request,
            _username: &str,
            _password: &str,
        ) -> Result<Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    #[derive(Default)]
    struct CountingAttempts {
        validations: AtomicUsize,
        failures: AtomicUsize,
        locked: bool,
    }

    #[async_trait]
    impl LoginAttemptService for CountingAttempts {
        async fn validate(&self, _username: &str, _client_ip: &str) -> Result<()> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            if self.locked {
                return Err(AuthnError::TooManyAttempts);
            }
            Ok(())
        }
        async fn record_failure(&self, _username: &str, _client_ip: &str) -> Result<()> {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn reset(&self, _username: &str, _client_ip: &str) -> Result<()> {
            Ok(())
        }
    }

    fn ok_identity() -> Result<Identity> {
        Ok(Identity::new(TypedId::user(1)))
    }

    fn wrong_password() -> Result<Identity> {
        Err(AuthnError::invalid_credentials("wrong password"))
    }

    fn unknown_user() -> Result<Identity> {
        Err(AuthnError::identity_not_found("no such user"))
    }

    fn backend_down() -> Result<Identity> {
        Err(AuthnError::internal("directory unreachable"))
    }

    fn request() -> Request {
        Request::new(Method::POST, "/login").with_client_ip("10.1.1.1")
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let attempts = Arc::new(CountingAttempts::default());
        let mut client = PasswordClient::new(attempts.clone());
        let db = ScriptedBackend::new("database", ok_identity);
        let ldap = ScriptedBackend::new("ldap", ok_identity);
        client.register(db.clone());
        client.register(ldap.clone());

        let identity = client
            .authenticate_password(&request(), "alice", "secret")
            .await
            .unwrap();

        assert_eq!(identity.user_id(), Some(1));
        assert_eq!(db.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ldap.calls.load(Ordering::SeqCst), 0);
        assert_eq!(attempts.validations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_continues_past_try_next_signals() {
        let attempts = Arc::new(CountingAttempts::default());
        let mut client = PasswordClient::new(attempts.clone());
        client.register(ScriptedBackend::new("database", unknown_user));
        let ldap = ScriptedBackend::new("ldap", ok_identity);
        client.register(ldap.clone());

        client
            .authenticate_password(&request(), "alice", "secret")
            .await
            .unwrap();

        assert_eq!(ldap.calls.load(Ordering::SeqCst), 1);
        // Not-found never counts against lockout.
        assert_eq!(attempts.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_password_records_exactly_one_attempt() {
        let attempts = Arc::new(CountingAttempts::default());
        let mut client = PasswordClient::new(attempts.clone());
        client.register(ScriptedBackend::new("database", wrong_password));
        client.register(ScriptedBackend::new("ldap", unknown_user));

        let err = client
            .authenticate_password(&request(), "alice", "bad")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));
        assert_eq!(attempts.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_errors_abort_the_chain() {
        let attempts = Arc::new(CountingAttempts::default());
        let mut client = PasswordClient::new(attempts.clone());
        client.register(ScriptedBackend::new("database", backend_down));
        let never = ScriptedBackend::new("ldap", ok_identity);
        client.register(never.clone());

        let err = client
            .authenticate_password(&request(), "alice", "secret")
            .await
            .unwrap_err();

        // Wrapped as a credential failure so the caller cannot tell an
        // outage from a wrong password.
        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));
        assert_eq!(err.public_message(), "invalid username or password");
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
        assert_eq!(attempts.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lockout_checked_before_any_backend() {
        let attempts = Arc::new(CountingAttempts {
            locked: true,
            ..CountingAttempts::default()
        });
        let mut client = PasswordClient::new(attempts);
        let backend = ScriptedBackend::new("database", ok_identity);
        client.register(backend.clone());

        let err = client
            .authenticate_password(&request(), "alice", "secret")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthnError::TooManyAttempts));
        assert_eq!(err.public_message(), "invalid username or password");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_collapses_to_generic_failure() {
        let attempts = Arc::new(CountingAttempts::default());
        let mut client = PasswordClient::new(attempts);
        client.register(ScriptedBackend::new("database", unknown_user));
        client.register(ScriptedBackend::new("ldap", unknown_user));

        let err = client
            .authenticate_password(&request(), "nobody", "secret")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));
        assert_eq!(err.public_message(), "invalid username or password");
    }

    #[tokio::test]
    async fn test_empty_password_rejected_without_backend_calls() {
        let attempts = Arc::new(CountingAttempts::default());
        let mut client = PasswordClient::new(attempts);
        let backend = ScriptedBackend::new("database", ok_identity);
        client.register(backend.clone());

        let err = client
            .authenticate_password(&request(), "alice", "")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}

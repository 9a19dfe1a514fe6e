//! Passwordless magic-link client
//!
//! `start` emails a short login code and sets a confirmation nonce cookie;
//! the pending code is held Argon2-hashed under the nonce until the TTL
//! lapses. `authenticate` requires both halves, so neither a leaked email
//! nor a stolen cookie is sufficient on its own. Codes are single-use.
//!
//! The client never touches the user store. It emits lookup params for the
//! email and lets user sync resolve or sign up the account.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use warden_core::{
    auth_module, AuthnError, ClientParams, CookieInstruction, ExternalUserInfo, Identity,
    LookupParams, Mailer, Redirect, Request, Result,
};

use crate::config::PasswordlessSettings;
use crate::password_hash::{generate_login_code, hash_password_async, verify_password_async};

use super::{client_name, priority, AuthnClient, RedirectClient};

pub const PASSWORDLESS_CONFIRMATION_COOKIE: &str = "passwordless_confirmation";

const CODE_LENGTH: usize = 8;
const NONCE_LENGTH: usize = 32;

#[derive(Clone)]
struct PendingLogin {
    email: String,
    code_hash: String,
}

pub struct PasswordlessClient {
    settings: PasswordlessSettings,
    mailer: Arc<dyn Mailer>,
    pending: Cache<String, PendingLogin>,
}

impl PasswordlessClient {
    pub fn new(settings: PasswordlessSettings, mailer: Arc<dyn Mailer>) -> Self {
        let pending = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(settings.code_ttl_mins * 60))
            .build();
        Self {
            settings,
            mailer,
            pending,
        }
    }
}

#[async_trait]
impl AuthnClient for PasswordlessClient {
    fn name(&self) -> &str {
        client_name::PASSWORDLESS
    }

    fn test(&self, req: &Request) -> bool {
        self.settings.enabled
            && req.query_param("code").is_some()
            && req.cookie(PASSWORDLESS_CONFIRMATION_COOKIE).is_some()
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let code = req
            .query_param("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthnError::missing_attribute("code"))?;
        let nonce = req
            .cookie(PASSWORDLESS_CONFIRMATION_COOKIE)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AuthnError::invalid_credentials("missing passwordless confirmation cookie")
            })?;

        let entry = self
            .pending
            .get(&nonce)
            .await
            .ok_or_else(|| AuthnError::invalid_credentials("login code expired or unknown"))?;

        if !verify_password_async(code, entry.code_hash.clone()).await {
            return Err(AuthnError::invalid_credentials("login code mismatch"));
        }

        // Single use.
        self.pending.invalidate(&nonce).await;

        let info = ExternalUserInfo {
            auth_module: auth_module::PASSWORDLESS.to_string(),
            auth_id: entry.email.clone(),
            email: entry.email.clone(),
            login: entry.email.clone(),
            ..ExternalUserInfo::default()
        };
        Ok(Identity::from_external(
            &info,
            ClientParams {
                sync_user: true,
                allow_sign_up: true,
                fetch_synced_user: true,
                sync_permissions: true,
                lookup_params: LookupParams {
                    email: Some(entry.email.clone()),
                    ..LookupParams::default()
                },
                ..ClientParams::default()
            },
        ))
    }

    fn priority(&self) -> u32 {
        priority::PASSWORDLESS
    }
}

#[async_trait]
impl RedirectClient for PasswordlessClient {
    #[instrument(skip_all)]
    async fn redirect_url(&self, req: &Request) -> Result<Redirect> {
        let email = req
            .query_param("email")
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthnError::missing_attribute("email"))?;

        let code = generate_login_code(CODE_LENGTH);
        let nonce = generate_login_code(NONCE_LENGTH);
        let code_hash = hash_password_async(code.clone())
            .await
            .map_err(|e| AuthnError::internal(format!("failed to hash login code: {e}")))?;

        self.pending
            .insert(
                nonce.clone(),
                PendingLogin {
                    email: email.clone(),
                    code_hash,
                },
            )
            .await;

        self.mailer.send_login_code(&email, &code).await?;
        info!(email, "sent passwordless login code");

        Ok(Redirect {
            url: "/login/passwordless/confirm".to_string(),
            cookies: vec![CookieInstruction::set(
                PASSWORDLESS_CONFIRMATION_COOKIE,
                nonce,
                (self.settings.code_ttl_mins * 60) as i64,
            )],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send_login_code(&self, email: &str, code: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn client(mailer: Arc<CapturingMailer>) -> PasswordlessClient {
        PasswordlessClient::new(
            PasswordlessSettings {
                enabled: true,
                code_ttl_mins: 20,
            },
            mailer,
        )
    }

    async fn start(client: &PasswordlessClient, email: &str) -> (String, String) {
        let redirect = client
            .redirect_url(
                &Request::new(Method::POST, "/login/passwordless/start")
                    .with_query(format!("email={email}")),
            )
            .await
            .unwrap();
        let nonce = redirect.cookies[0].value.clone();
        (redirect.url, nonce)
    }

    fn confirm_request(code: &str, nonce: &str) -> Request {
        Request::new(Method::GET, "/login/passwordless")
            .with_query(&format!("code={code}"))
            .with_header(
                http::header::COOKIE,
                &format!("{PASSWORDLESS_CONFIRMATION_COOKIE}={nonce}"),
            )
    }

    #[tokio::test]
    async fn test_emailed_code_with_nonce_cookie_authenticates() {
        let mailer = Arc::new(CapturingMailer::default());
        let client = client(Arc::clone(&mailer));

        let (url, nonce) = start(&client, "alice@example.com").await;
        assert_eq!(url, "/login/passwordless/confirm");

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice@example.com");
        let code = sent[0].1.clone();

        let identity = client
            .authenticate(&confirm_request(&code, &nonce))
            .await
            .unwrap();

        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.authenticated_by, auth_module::PASSWORDLESS);
        assert!(identity.client_params.sync_user);
        assert_eq!(
            identity.client_params.lookup_params.email.as_deref(),
            Some("alice@example.com")
        );
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let mailer = Arc::new(CapturingMailer::default());
        let client = client(Arc::clone(&mailer));

        let (_, nonce) = start(&client, "alice@example.com").await;
        let code = mailer.sent.lock().unwrap()[0].1.clone();

        client
            .authenticate(&confirm_request(&code, &nonce))
            .await
            .unwrap();
        let err = client
            .authenticate(&confirm_request(&code, &nonce))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));
    }

    #[tokio::test]
    async fn test_wrong_code_or_nonce_is_rejected() {
        let mailer = Arc::new(CapturingMailer::default());
        let client = client(Arc::clone(&mailer));

        let (_, nonce) = start(&client, "alice@example.com").await;
        let code = mailer.sent.lock().unwrap()[0].1.clone();

        let err = client
            .authenticate(&confirm_request("WRONGCOD", &nonce))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));

        let err = client
            .authenticate(&confirm_request(&code, "unknown-nonce"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::InvalidCredentials { .. }));
    }

    #[tokio::test]
    async fn test_start_requires_email() {
        let client = client(Arc::new(CapturingMailer::default()));
        let err = client
            .redirect_url(&Request::new(Method::POST, "/login/passwordless/start"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::MissingAttribute { .. }));
    }

    #[test]
    fn test_probe_requires_code_and_cookie() {
        let client = client(Arc::new(CapturingMailer::default()));
        assert!(client.test(&confirm_request("abc", "nonce")));
        assert!(!client.test(&Request::new(Method::GET, "/login/passwordless")));
    }
}

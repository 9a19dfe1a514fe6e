//! OAuth token refresh manager
//!
//! Guarantees at most one in-flight provider refresh per identity: a
//! singleflight group collapses concurrent callers inside the process, and a
//! server lock serializes refreshers across instances. The refresh itself
//! runs on a detached task with its own timeout, so an abandoned request
//! never strands the waiters behind it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use warden_core::{
    AuthInfoQuery, AuthInfoService, AuthnError, OAuthConnector, OAuthToken, NewExternalSession,
    Result, SessionToken, SessionTokenService, SetAuthInfoCommand, TypedId,
};

use crate::lock::{acquire_with_retries, LockRetryConfig, ServerLock};
use crate::singleflight::Group;
use crate::verify::decode_unverified_claims;

/// Whether a stored token bundle must be refreshed before use. An empty
/// access token always needs one; otherwise the access-token expiry and the
/// id-token's own `exp` are checked independently, and a bundle carrying no
/// expiry information at all never needs one.
pub fn needs_refresh(token: &OAuthToken) -> bool {
    if token.access_token.is_empty() {
        return true;
    }

    let id_token_expiry = token
        .id_token
        .as_deref()
        .and_then(|t| decode_unverified_claims(t).ok())
        .and_then(|claims| claims.expiry());

    if token.expiry.is_none() && id_token_expiry.is_none() {
        return false;
    }

    let now = Utc::now();
    token.expiry.map(|e| e <= now).unwrap_or(false)
        || id_token_expiry.map(|e| e <= now).unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Upper bound on one refresh execution, independent of the caller's
    /// own cancellation.
    pub refresh_timeout: Duration,
    pub lock_retries: LockRetryConfig,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(15),
            lock_retries: LockRetryConfig::default(),
        }
    }
}

pub struct TokenRefresher {
    auth_info: Arc<dyn AuthInfoService>,
    session_tokens: Arc<dyn SessionTokenService>,
    lock: Arc<dyn ServerLock>,
    group: Group<Result<OAuthToken>>,
    config: RefreshConfig,
}

impl TokenRefresher {
    pub fn new(
        auth_info: Arc<dyn AuthInfoService>,
        session_tokens: Arc<dyn SessionTokenService>,
        lock: Arc<dyn ServerLock>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            auth_info,
            session_tokens,
            lock,
            group: Group::new(),
            config,
        }
    }

    /// Returns a usable token bundle for the identity, refreshing it
    /// against the provider when necessary.
    #[instrument(skip(self, connector, session_token), fields(user = %user))]
    pub async fn try_refresh(
        &self,
        connector: Arc<dyn OAuthConnector>,
        user: &TypedId,
        auth_module: &str,
        session_token: Option<&SessionToken>,
    ) -> Result<OAuthToken> {
        let user_id = user
            .record_id()
            .ok_or_else(|| AuthnError::unexpected_identity_type(user.id_type().to_string()))?;

        let query = AuthInfoQuery {
            user_id: Some(user_id),
            auth_module: Some(auth_module.to_string()),
            ..Default::default()
        };

        let stored = self
            .auth_info
            .get_auth_info(&query)
            .await?
            .ok_or_else(|| AuthnError::identity_not_found("no auth info for identity"))?;
        let current = stored.oauth_token();

        if !needs_refresh(&current) {
            return Ok(current);
        }
        if !connector.supports_refresh() {
            debug!("provider does not support refresh tokens, using stored token");
            return Ok(current);
        }

        let external_session_id = session_token.and_then(|t| t.external_session_id);
        let key = match external_session_id {
            Some(es) => format!("token-refresh:{}:{}", user, es),
            None => format!("token-refresh:{}", user),
        };

        let auth_info = Arc::clone(&self.auth_info);
        let session_tokens = Arc::clone(&self.session_tokens);
        let lock = Arc::clone(&self.lock);
        let retry = self.config.lock_retries.clone();
        let timeout = self.config.refresh_timeout;
        let lock_key = key.clone();

        let outcome = self
            .group
            .work(&key, async move {
                let refresh = Self::refresh_under_lock(
                    auth_info,
                    session_tokens,
                    lock,
                    retry,
                    connector,
                    lock_key,
                    query,
                    external_session_id,
                );
                match tokio::time::timeout(timeout, refresh).await {
                    Ok(result) => result,
                    Err(_) => Err(AuthnError::internal("token refresh timed out")),
                }
            })
            .await;

        outcome.unwrap_or_else(|| Err(AuthnError::internal("token refresh task was dropped")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn refresh_under_lock(
        auth_info: Arc<dyn AuthInfoService>,
        session_tokens: Arc<dyn SessionTokenService>,
        lock: Arc<dyn ServerLock>,
        retry: LockRetryConfig,
        connector: Arc<dyn OAuthConnector>,
        lock_key: String,
        query: AuthInfoQuery,
        external_session_id: Option<i64>,
    ) -> Result<OAuthToken> {
        acquire_with_retries(lock.as_ref(), &lock_key, &retry).await?;
        let result = Self::refresh_stored_token(
            auth_info,
            session_tokens,
            connector,
            query,
            external_session_id,
        )
        .await;
        if let Err(e) = lock.release(&lock_key).await {
            warn!(error = %e, key = %lock_key, "failed to release refresh lock");
        }
        result
    }

    async fn refresh_stored_token(
        auth_info: Arc<dyn AuthInfoService>,
        session_tokens: Arc<dyn SessionTokenService>,
        connector: Arc<dyn OAuthConnector>,
        query: AuthInfoQuery,
        external_session_id: Option<i64>,
    ) -> Result<OAuthToken> {
        // Reload inside the lock: another instance may have refreshed while
        // this one waited.
        let row = auth_info
            .get_auth_info(&query)
            .await?
            .ok_or_else(|| AuthnError::identity_not_found("no auth info for identity"))?;
        let stored = row.oauth_token();

        if !needs_refresh(&stored) {
            debug!("token was refreshed while waiting for the lock");
            return Ok(stored);
        }

        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Err(AuthnError::NoRefreshToken);
        };

        match connector.refresh(&refresh_token).await {
            Ok(mut fresh) => {
                // Providers that do not rotate refresh tokens omit them from
                // the response; keep using the stored one.
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token);
                }

                if fresh.same_as(&stored) {
                    return Ok(fresh);
                }

                auth_info
                    .update_auth_info(&SetAuthInfoCommand {
                        user_id: row.user_id,
                        auth_module: row.auth_module.clone(),
                        auth_id: row.auth_id.clone(),
                        oauth_token: Some(fresh.clone()),
                    })
                    .await?;

                if let Some(es_id) = external_session_id {
                    session_tokens
                        .update_external_session(
                            es_id,
                            &NewExternalSession {
                                access_token: fresh.access_token.clone(),
                                refresh_token: fresh.refresh_token.clone(),
                                id_token: fresh.id_token.clone(),
                                expires_at: fresh.expiry,
                            },
                        )
                        .await?;
                }

                Ok(fresh)
            }
            Err(err) => {
                // A concurrent refresher may have advanced the stored expiry
                // past now before ours failed; treat that as success.
                if let Ok(Some(row)) = auth_info.get_auth_info(&query).await {
                    let token = row.oauth_token();
                    if let Some(expiry) = token.expiry {
                        if expiry > Utc::now() {
                            warn!("refresh failed but stored token is current, using it");
                            return Ok(token);
                        }
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryServerLock;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use warden_core::{ExternalSession, ProviderUserInfo, UserAuth};

    fn row_with_expiry(expiry: Option<chrono::DateTime<Utc>>) -> UserAuth {
        UserAuth {
            id: 1,
            user_id: 3,
            auth_module: "oauth_generic".to_string(),
            auth_id: "subject-3".to_string(),
            oauth_access_token: "stored-access".to_string(),
            oauth_refresh_token: Some("stored-refresh".to_string()),
            oauth_id_token: None,
            oauth_token_type: "Bearer".to_string(),
            oauth_expiry: expiry,
            created_at: Utc::now(),
        }
    }

    fn expired_row() -> UserAuth {
        row_with_expiry(Some(Utc::now() - ChronoDuration::minutes(5)))
    }

    struct MockAuthInfo {
        row: Mutex<Option<UserAuth>>,
        gets: AtomicUsize,
        updates: AtomicUsize,
        /// When set, this row is returned once get_auth_info has been
        /// called `valid_after` times, simulating another instance
        /// refreshing behind our back.
        race_row: Option<(usize, UserAuth)>,
    }

    impl MockAuthInfo {
        fn with_row(row: UserAuth) -> Self {
            Self {
                row: Mutex::new(Some(row)),
                gets: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                race_row: None,
            }
        }
    }

    #[async_trait]
    impl AuthInfoService for MockAuthInfo {
        async fn get_auth_info(&self, _query: &AuthInfoQuery) -> Result<Option<UserAuth>> {
            let n = self.gets.fetch_add(1, Ordering::SeqCst);
            if let Some((valid_after, race)) = &self.race_row {
                if n >= *valid_after {
                    return Ok(Some(race.clone()));
                }
            }
            Ok(self.row.lock().unwrap().clone())
        }

        async fn set_auth_info(&self, _cmd: &SetAuthInfoCommand) -> Result<()> {
            Err(AuthnError::internal("Not implemented"))
        }

        async fn update_auth_info(&self, cmd: &SetAuthInfoCommand) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut row = self.row.lock().unwrap();
            if let (Some(row), Some(token)) = (row.as_mut(), cmd.oauth_token.as_ref()) {
                row.oauth_access_token = token.access_token.clone();
                row.oauth_refresh_token = token.refresh_token.clone();
                row.oauth_id_token = token.id_token.clone();
                row.oauth_expiry = token.expiry;
            }
            Ok(())
        }

        async fn delete_user_auth_info(&self, _user_id: i64) -> Result<()> {
            Err(AuthnError::internal("Not implemented"))
        }
    }

    #[derive(Default)]
    struct MockSessions {
        external_updates: AtomicUsize,
    }

    #[async_trait]
    impl SessionTokenService for MockSessions {
        async fn create_token(
            &self,
            _cmd: &warden_core::CreateTokenCommand,
        ) -> Result<SessionToken> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn lookup_token(&self, _unhashed: &str) -> Result<SessionToken> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn revoke_token(&self, _token: &SessionToken, _soft: bool) -> Result<()> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn revoke_all_user_tokens(&self, _user_id: i64) -> Result<()> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn get_external_session(&self, _id: i64) -> Result<ExternalSession> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn update_external_session(
            &self,
            _id: i64,
            _session: &NewExternalSession,
        ) -> Result<()> {
            self.external_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockConnector {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl MockConnector {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Duration::from_millis(30),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
                delay: Duration::from_millis(1),
            }
        }
    }

    #[async_trait]
    impl OAuthConnector for MockConnector {
        fn name(&self) -> &str {
            "generic"
        }
        fn supports_refresh(&self) -> bool {
            true
        }
        fn auth_code_url(&self, _state: &str, _pkce_challenge: Option<&str>) -> String {
            String::new()
        }
        async fn exchange(&self, _code: &str, _verifier: Option<&str>) -> Result<OAuthToken> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn user_info(&self, _token: &OAuthToken) -> Result<ProviderUserInfo> {
            Err(AuthnError::internal("Not implemented"))
        }
        async fn refresh(&self, _refresh_token: &str) -> Result<OAuthToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(AuthnError::provider_error("invalid_grant"));
            }
            Ok(OAuthToken {
                access_token: "fresh-access".to_string(),
                token_type: "Bearer".to_string(),
                refresh_token: None,
                expiry: Some(Utc::now() + ChronoDuration::hours(1)),
                id_token: None,
            })
        }
    }

    fn refresher(auth_info: Arc<MockAuthInfo>, sessions: Arc<MockSessions>) -> TokenRefresher {
        let config = RefreshConfig {
            refresh_timeout: Duration::from_secs(5),
            lock_retries: LockRetryConfig {
                attempts: 10,
                min_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(10),
                ttl: Duration::from_secs(30),
            },
        };
        TokenRefresher::new(auth_info, sessions, Arc::new(MemoryServerLock::new()), config)
    }

    #[test]
    fn test_needs_refresh_rules() {
        let mut token = OAuthToken {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("rt".to_string()),
            expiry: None,
            id_token: None,
        };
        // No expiry information anywhere: nothing to do.
        assert!(!needs_refresh(&token));

        token.expiry = Some(Utc::now() + ChronoDuration::hours(1));
        assert!(!needs_refresh(&token));

        token.expiry = Some(Utc::now() - ChronoDuration::minutes(1));
        assert!(needs_refresh(&token));

        token.expiry = None;
        token.access_token = String::new();
        assert!(needs_refresh(&token));
    }

    #[tokio::test]
    async fn test_valid_stored_token_is_returned_without_provider_call() {
        let auth_info = Arc::new(MockAuthInfo::with_row(row_with_expiry(Some(
            Utc::now() + ChronoDuration::hours(1),
        ))));
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::ok());
        let refresher = refresher(Arc::clone(&auth_info), sessions);

        let token = refresher
            .try_refresh(
                connector.clone() as Arc<dyn OAuthConnector>,
                &TypedId::user(3),
                "oauth_generic",
                None,
            )
            .await
            .unwrap();

        assert_eq!(token.access_token, "stored-access");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let auth_info = Arc::new(MockAuthInfo::with_row(expired_row()));
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::ok());
        let refresher = refresher(Arc::clone(&auth_info), Arc::clone(&sessions));

        let token = refresher
            .try_refresh(
                connector.clone() as Arc<dyn OAuthConnector>,
                &TypedId::user(3),
                "oauth_generic",
                None,
            )
            .await
            .unwrap();

        assert_eq!(token.access_token, "fresh-access");
        // The rotated-out refresh token is carried over when the provider
        // omits a new one.
        assert_eq!(token.refresh_token.as_deref(), Some("stored-refresh"));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth_info.updates.load(Ordering::SeqCst), 1);
        // No external session tracked, so no snapshot update.
        assert_eq!(sessions.external_updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_external_session_snapshot_updated() {
        let auth_info = Arc::new(MockAuthInfo::with_row(expired_row()));
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::ok());
        let refresher = refresher(auth_info, Arc::clone(&sessions));

        let session_token = SessionToken {
            id: 10,
            user_id: 3,
            auth_token: "hash".to_string(),
            prev_auth_token: String::new(),
            token_seen: true,
            client_ip: String::new(),
            user_agent: String::new(),
            rotated_at: Utc::now(),
            created_at: Utc::now(),
            revoked_at: None,
            external_session_id: Some(77),
            unhashed_token: None,
        };

        refresher
            .try_refresh(
                connector as Arc<dyn OAuthConnector>,
                &TypedId::user(3),
                "oauth_generic",
                Some(&session_token),
            )
            .await
            .unwrap();

        assert_eq!(sessions.external_updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_terminal() {
        let mut row = expired_row();
        row.oauth_refresh_token = None;
        let auth_info = Arc::new(MockAuthInfo::with_row(row));
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::ok());
        let refresher = refresher(auth_info, sessions);

        let result = refresher
            .try_refresh(
                connector.clone() as Arc<dyn OAuthConnector>,
                &TypedId::user(3),
                "oauth_generic",
                None,
            )
            .await;

        assert!(matches!(result, Err(AuthnError::NoRefreshToken)));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_make_one_provider_call() {
        let auth_info = Arc::new(MockAuthInfo::with_row(expired_row()));
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::ok());
        let refresher = Arc::new(refresher(Arc::clone(&auth_info), sessions));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let refresher = Arc::clone(&refresher);
            let connector = Arc::clone(&connector);
            handles.push(tokio::spawn(async move {
                refresher
                    .try_refresh(
                        connector as Arc<dyn OAuthConnector>,
                        &TypedId::user(3),
                        "oauth_generic",
                        None,
                    )
                    .await
            }));
        }

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.access_token, "fresh-access");
        }
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_raced_by_another_instance_is_swallowed() {
        let mut mock = MockAuthInfo::with_row(expired_row());
        // Fast path and the reload under the lock see the expired row; the
        // post-failure re-check sees a row another instance refreshed.
        mock.race_row = Some((
            2,
            row_with_expiry(Some(Utc::now() + ChronoDuration::hours(1))),
        ));
        let auth_info = Arc::new(mock);
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::failing());
        let refresher = refresher(auth_info, sessions);

        let token = refresher
            .try_refresh(
                connector.clone() as Arc<dyn OAuthConnector>,
                &TypedId::user(3),
                "oauth_generic",
                None,
            )
            .await
            .unwrap();

        assert_eq!(token.access_token, "stored-access");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_without_race_propagates() {
        let auth_info = Arc::new(MockAuthInfo::with_row(expired_row()));
        let sessions = Arc::new(MockSessions::default());
        let connector = Arc::new(MockConnector::failing());
        let refresher = refresher(auth_info, sessions);

        let result = refresher
            .try_refresh(
                connector as Arc<dyn OAuthConnector>,
                &TypedId::user(3),
                "oauth_generic",
                None,
            )
            .await;

        assert!(matches!(result, Err(AuthnError::Provider { .. })));
    }
}

//! Collaborator interfaces consumed by the authentication core
//!
//! This core performs no storage or provider I/O of its own. Everything it
//! reads or mutates (accounts, org membership, permissions, tokens, quota)
//! goes through these traits, which makes every boundary mockable in tests
//! and swappable in deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::{
    ExternalUserInfo, FetchPermissionsParams, Identity, OrgRole, TokenClaims,
};
use crate::session::{ExternalSession, OAuthToken, SessionToken, UserAuth};

// =============================================================================
// Users
// =============================================================================

/// Persisted user account, as seen by the sync hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub uid: String,
    pub login: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub is_server_admin: bool,
    pub is_disabled: bool,
    /// Argon2 PHC string; empty for accounts that only authenticate
    /// externally.
    pub password_hash: String,
    pub default_org_id: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Signed-in view of an account with the active org resolved server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: i64,
    pub uid: String,
    pub org_id: i64,
    pub org_role: OrgRole,
    pub login: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub is_server_admin: bool,
    pub is_disabled: bool,
    pub teams: Vec<i64>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateUserCommand {
    pub login: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub is_server_admin: bool,
    /// Org the account starts in; `None` uses the deployment default.
    pub org_id: Option<i64>,
}

/// Field update for an existing account; `None` leaves the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateUserCommand {
    pub user_id: i64,
    pub login: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub email_verified: Option<bool>,
    pub is_server_admin: Option<bool>,
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_by_id(&self, user_id: i64) -> Result<User>;
    async fn get_by_email(&self, email: &str) -> Result<User>;
    async fn get_by_login(&self, login: &str) -> Result<User>;
    async fn create(&self, cmd: &CreateUserCommand) -> Result<User>;
    async fn update(&self, cmd: &UpdateUserCommand) -> Result<()>;
    async fn update_last_seen_at(&self, user_id: i64) -> Result<()>;
    async fn get_signed_in_user(&self, user_id: i64, org_id: i64) -> Result<UserSnapshot>;
    async fn set_disabled(&self, user_id: i64, disabled: bool) -> Result<()>;
}

// =============================================================================
// Organizations
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMembership {
    pub org_id: i64,
    pub name: String,
    pub role: OrgRole,
}

#[async_trait]
pub trait OrgService: Send + Sync {
    async fn get_user_org_list(&self, user_id: i64) -> Result<Vec<OrgMembership>>;
    async fn add_org_user(&self, org_id: i64, user_id: i64, role: OrgRole) -> Result<()>;
    async fn update_org_user(&self, org_id: i64, user_id: i64, role: OrgRole) -> Result<()>;
    /// Fails with [`crate::AuthnError::LastOrgAdmin`] when removal would
    /// leave the org without an admin.
    async fn remove_org_user(&self, org_id: i64, user_id: i64) -> Result<()>;
    async fn get_by_name(&self, name: &str) -> Result<Org>;
    /// Persist which org the account is actively using.
    async fn set_using_org(&self, user_id: i64, org_id: i64) -> Result<()>;
}

// =============================================================================
// Access control
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub action: String,
    pub scope: String,
}

#[async_trait]
pub trait AccessControlService: Send + Sync {
    /// Permission fetch is disabled entirely (hook becomes a no-op).
    fn is_disabled(&self) -> bool {
        false
    }
    async fn get_user_permissions(
        &self,
        org_id: i64,
        identity: &Identity,
        params: Option<&FetchPermissionsParams>,
    ) -> Result<Vec<Permission>>;
    async fn delete_user_permissions(&self, org_id: i64, user_id: i64) -> Result<()>;
}

// =============================================================================
// Auth info (provider-connection rows)
// =============================================================================

/// Lookup filter; set fields are ANDed. A user-id-only query returns the
/// most recently created row across modules.
#[derive(Debug, Clone, Default)]
pub struct AuthInfoQuery {
    pub user_id: Option<i64>,
    pub auth_module: Option<String>,
    pub auth_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SetAuthInfoCommand {
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
    pub oauth_token: Option<OAuthToken>,
}

/// Storage contract: OAuth token fields are encrypted and base64-encoded at
/// rest (encrypt-then-encode on write, decode-then-decrypt on read), using
/// the deployment's [`crate::secrets::SecretsService`].
#[async_trait]
pub trait AuthInfoService: Send + Sync {
    async fn get_auth_info(&self, query: &AuthInfoQuery) -> Result<Option<UserAuth>>;
    async fn set_auth_info(&self, cmd: &SetAuthInfoCommand) -> Result<()>;
    /// Updates the row for `(user_id, auth_module)`, cleaning up duplicate
    /// rows for the same pair.
    async fn update_auth_info(&self, cmd: &SetAuthInfoCommand) -> Result<()>;
    async fn delete_user_auth_info(&self, user_id: i64) -> Result<()>;
}

// =============================================================================
// Session tokens
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CreateTokenCommand {
    pub user_id: i64,
    pub client_ip: String,
    pub user_agent: String,
    /// Third-party session to track alongside the first-party token.
    pub external_session: Option<NewExternalSession>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExternalSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SessionTokenService: Send + Sync {
    async fn create_token(&self, cmd: &CreateTokenCommand) -> Result<SessionToken>;
    /// Resolves a cleartext token value to the stored token.
    async fn lookup_token(&self, unhashed: &str) -> Result<SessionToken>;
    /// `soft` keeps the row around flagged as revoked (logout UX); hard
    /// revocation deletes it outright.
    async fn revoke_token(&self, token: &SessionToken, soft: bool) -> Result<()>;
    async fn revoke_all_user_tokens(&self, user_id: i64) -> Result<()>;
    async fn get_external_session(&self, id: i64) -> Result<ExternalSession>;
    async fn update_external_session(&self, id: i64, session: &NewExternalSession) -> Result<()>;
}

// =============================================================================
// API keys
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: i64,
    pub org_id: i64,
    pub role: OrgRole,
    /// Set when the key belongs to a service account rather than standing
    /// alone.
    pub service_account_id: Option<i64>,
    pub is_revoked: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ApiKeyService: Send + Sync {
    /// Resolves a key by the hash of its secret.
    async fn get_key_by_hash(&self, hash: &str) -> Result<ApiKey>;
}

// =============================================================================
// OAuth provider connector and token verification
// =============================================================================

/// Profile returned by a provider's user-info endpoint, with the raw claim
/// set preserved for configurable attribute-path extraction.
#[derive(Debug, Clone, Default)]
pub struct ProviderUserInfo {
    pub subject: String,
    pub login: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub role: Option<String>,
    pub groups: Vec<String>,
    pub raw: TokenClaims,
}

/// One configured OAuth2/OIDC provider.
#[async_trait]
pub trait OAuthConnector: Send + Sync {
    fn name(&self) -> &str;
    fn supports_refresh(&self) -> bool;
    /// Authorization URL for the redirect phase. `pkce_challenge` is the
    /// S256 challenge derived from the verifier kept in the cookie.
    fn auth_code_url(&self, state: &str, pkce_challenge: Option<&str>) -> String;
    async fn exchange(&self, code: &str, pkce_verifier: Option<&str>) -> Result<OAuthToken>;
    async fn user_info(&self, token: &OAuthToken) -> Result<ProviderUserInfo>;
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken>;
}

/// Signature verification contract for JWT-bearing clients.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<TokenClaims>;
}

// =============================================================================
// Quota, lockout, directory backends, mail
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    /// Total user accounts across the deployment.
    User,
    /// User accounts within one org.
    OrgUser(i64),
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn check_quota_reached(&self, scope: QuotaScope) -> Result<bool>;
}

/// Failed-login bookkeeping keyed by `(username, client IP)`.
#[async_trait]
pub trait LoginAttemptService: Send + Sync {
    /// Fails with [`crate::AuthnError::TooManyAttempts`] when the pair is
    /// locked out.
    async fn validate(&self, username: &str, client_ip: &str) -> Result<()>;
    async fn record_failure(&self, username: &str, client_ip: &str) -> Result<()>;
    async fn reset(&self, username: &str, client_ip: &str) -> Result<()>;
}

#[async_trait]
pub trait LdapService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<ExternalUserInfo>;
    /// Profile lookup without credentials, for proxy-header resolution.
    async fn get_user(&self, username: &str) -> Result<ExternalUserInfo>;
}

#[async_trait]
pub trait RadiusService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<ExternalUserInfo>;
}

/// Out-of-band delivery for passwordless login codes.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_login_code(&self, email: &str, code: &str) -> Result<()>;
}

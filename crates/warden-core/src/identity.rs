//! The resolved-subject model
//!
//! `Identity` is the unit of authentication state for one request. A client
//! constructs it, the sync pipeline mutates it in place, and the caller
//! receives the final view. It is never persisted directly.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthnError;
use crate::ids::{IdentityType, TypedId};
use crate::session::{OAuthToken, SessionToken};

/// Org id under which global (cross-org) permissions are cached.
pub const GLOBAL_ORG_ID: i64 = 0;

/// Names of the authentication modules recorded in `Identity.authenticated_by`
/// and in persisted auth-info rows.
pub mod auth_module {
    pub const PASSWORD: &str = "password";
    pub const DATABASE: &str = "database";
    pub const LDAP: &str = "ldap";
    pub const RADIUS: &str = "radius";
    pub const PROXY: &str = "authproxy";
    pub const JWT: &str = "jwt";
    pub const EXT_JWT: &str = "extjwt";
    pub const API_KEY: &str = "apikey";
    pub const SESSION: &str = "session";
    pub const ANONYMOUS: &str = "anonymous";
    pub const PASSWORDLESS: &str = "passwordless";
    pub const PROVISIONING: &str = "provisioning";

    const OAUTH_PREFIX: &str = "oauth_";

    pub fn oauth(provider: &str) -> String {
        format!("{}{}", OAUTH_PREFIX, provider)
    }

    pub fn is_oauth(module: &str) -> bool {
        module.starts_with(OAUTH_PREFIX)
    }

    /// Provider name for an `oauth_*` module.
    pub fn oauth_provider(module: &str) -> Option<&str> {
        module.strip_prefix(OAUTH_PREFIX)
    }
}

// =============================================================================
// Org roles
// =============================================================================

/// Basic role within one organization. Ordering is by capability:
/// Viewer < Editor < Admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrgRole {
    Viewer,
    Editor,
    Admin,
}

impl OrgRole {
    /// Whether this role covers everything `other` can do.
    pub fn includes(&self, other: OrgRole) -> bool {
        *self >= other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Viewer => "Viewer",
            OrgRole::Editor => "Editor",
            OrgRole::Admin => "Admin",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = AuthnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(OrgRole::Viewer),
            "editor" => Ok(OrgRole::Editor),
            "admin" => Ok(OrgRole::Admin),
            other => Err(AuthnError::bad_request(format!("invalid role: {}", other))),
        }
    }
}

/// org-id → action → scopes. Org id 0 holds global permissions.
pub type Permissions = HashMap<i64, HashMap<String, Vec<String>>>;

// =============================================================================
// Token claims
// =============================================================================

/// Verified claims from a third-party access or ID token, kept as raw JSON so
/// clients can extract values through configurable attribute paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims(pub Value);

impl TokenClaims {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Resolves a dot-path expression (`info.roles.0`) against the claims.
    /// Path segments index into objects by key and into arrays by position.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut current = &self.0;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn lookup_string(&self, path: &str) -> Option<String> {
        match self.lookup(path)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// A string claim that may be a single value or a list of values.
    pub fn lookup_string_list(&self, path: &str) -> Vec<String> {
        match self.lookup(path) {
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn subject(&self) -> Option<String> {
        self.lookup_string("sub")
    }

    pub fn namespace(&self) -> Option<String> {
        self.lookup_string("namespace")
    }

    /// `exp` interpreted as unix seconds.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        let exp = self.get("exp")?.as_i64()?;
        Utc.timestamp_opt(exp, 0).single()
    }
}

// =============================================================================
// Client params
// =============================================================================

/// Filter applied when fetching permissions during sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPermissionsParams {
    /// Restrict the fetched set to these actions (empty = no restriction).
    pub actions_lookup: Vec<String>,
    /// Additional role UIDs whose permissions should be included.
    pub roles: Vec<String>,
}

/// Account lookup order used by the user sync hook when no auth-info row
/// matches: id, then email, then login.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupParams {
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub login: Option<String>,
}

/// Hints set by the authenticating client and consumed by the sync pipeline.
/// This is the seam decoupling "which strategy authenticated you" from "what
/// post-processing should run".
#[derive(Debug, Clone, Default)]
pub struct ClientParams {
    /// Create or update the backing user account.
    pub sync_user: bool,
    /// Allow user sync to create an account that does not exist yet.
    pub allow_sign_up: bool,
    /// Reload the full signed-in user snapshot after account sync.
    pub fetch_synced_user: bool,
    /// Fetch and cache permissions for the active org.
    pub sync_permissions: bool,
    pub fetch_permissions_params: Option<FetchPermissionsParams>,
    /// Reconcile org membership against the externally granted org roles.
    pub sync_org_roles: bool,
    pub sync_teams: bool,
    /// Re-enable a disabled account on successful external authentication.
    pub enable_disabled_users: bool,
    pub lookup_params: LookupParams,
}

// =============================================================================
// External user info
// =============================================================================

/// Profile attributes supplied by an external backend (LDAP, RADIUS, OAuth
/// user-info, proxy headers) before any account exists locally.
#[derive(Debug, Clone, Default)]
pub struct ExternalUserInfo {
    pub auth_module: String,
    pub auth_id: String,
    pub user_id: Option<i64>,
    pub email: String,
    pub login: String,
    pub name: String,
    pub groups: Vec<String>,
    pub org_roles: HashMap<i64, OrgRole>,
    pub is_server_admin: Option<bool>,
    pub is_disabled: bool,
}

// =============================================================================
// Identity
// =============================================================================

/// Canonical resolved subject for one request.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Namespaced id, `type:raw`.
    pub id: TypedId,
    /// Stable unique identifier, where the backing record has one.
    pub uid: String,

    /// Active organization.
    pub org_id: i64,
    /// Org roles granted to this identity; `org_id` keys the active entry.
    pub org_roles: HashMap<i64, OrgRole>,

    pub login: String,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    /// Tri-state server-admin flag: `None` leaves the stored value alone.
    pub is_server_admin: Option<bool>,
    pub is_disabled: bool,
    pub teams: Vec<i64>,
    pub groups: Vec<String>,

    /// Module that authenticated this request (`ldap`, `oauth_github`, ...).
    pub authenticated_by: String,
    /// Provider-side subject identifier.
    pub auth_id: String,
    pub namespace: String,

    pub session_token: Option<SessionToken>,
    pub oauth_token: Option<OAuthToken>,
    pub id_token_claims: Option<TokenClaims>,
    pub access_token_claims: Option<TokenClaims>,
    /// Downstream-signed identity token minted by this system.
    pub id_token: String,

    pub permissions: Permissions,
    pub last_seen_at: Option<DateTime<Utc>>,

    pub client_params: ClientParams,
}

impl Identity {
    pub fn new(id: TypedId) -> Self {
        Self {
            id,
            uid: String::new(),
            org_id: 0,
            org_roles: HashMap::new(),
            login: String::new(),
            name: String::new(),
            email: String::new(),
            email_verified: false,
            is_server_admin: None,
            is_disabled: false,
            teams: Vec::new(),
            groups: Vec::new(),
            authenticated_by: String::new(),
            auth_id: String::new(),
            namespace: "default".to_string(),
            session_token: None,
            oauth_token: None,
            id_token_claims: None,
            access_token_claims: None,
            id_token: String::new(),
            permissions: Permissions::new(),
            last_seen_at: None,
            client_params: ClientParams::default(),
        }
    }

    pub fn id_type(&self) -> IdentityType {
        self.id.id_type()
    }

    /// Numeric backing-record id, for user/api-key/service-account kinds.
    pub fn user_id(&self) -> Option<i64> {
        self.id.record_id()
    }

    pub fn is_authenticated_by(&self, modules: &[&str]) -> bool {
        modules.iter().any(|m| *m == self.authenticated_by)
    }

    /// Display name with login and email fallbacks.
    pub fn name_or_fallback(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.login.is_empty() {
            &self.login
        } else {
            &self.email
        }
    }

    /// Role held in the active org.
    pub fn role(&self) -> Option<OrgRole> {
        self.org_roles.get(&self.org_id).copied()
    }

    /// Builds a user identity out of external backend attributes. Org roles
    /// supplied by the backend are always carried over; whether the pipeline
    /// acts on them is controlled solely by `params.sync_org_roles`.
    pub fn from_external(info: &ExternalUserInfo, params: ClientParams) -> Self {
        let id = match info.user_id {
            Some(user_id) => TypedId::user(user_id),
            None => TypedId::new(IdentityType::User, "0"),
        };
        Identity {
            login: info.login.clone(),
            name: info.name.clone(),
            email: info.email.clone(),
            groups: info.groups.clone(),
            org_roles: info.org_roles.clone(),
            is_server_admin: info.is_server_admin,
            is_disabled: info.is_disabled,
            authenticated_by: info.auth_module.clone(),
            auth_id: info.auth_id.clone(),
            client_params: params,
            ..Identity::new(id)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(OrgRole::Admin.includes(OrgRole::Editor));
        assert!(OrgRole::Admin.includes(OrgRole::Viewer));
        assert!(OrgRole::Editor.includes(OrgRole::Viewer));
        assert!(!OrgRole::Viewer.includes(OrgRole::Editor));
        assert!(OrgRole::Viewer.includes(OrgRole::Viewer));
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("admin".parse::<OrgRole>().unwrap(), OrgRole::Admin);
        assert_eq!("Editor".parse::<OrgRole>().unwrap(), OrgRole::Editor);
        assert!("owner".parse::<OrgRole>().is_err());
    }

    #[test]
    fn test_claims_lookup_paths() {
        let claims = TokenClaims(serde_json::json!({
            "sub": "user:3",
            "info": { "roles": ["Editor", "Viewer"], "org": "main" },
            "exp": 1_700_000_000,
        }));

        assert_eq!(claims.subject().as_deref(), Some("user:3"));
        assert_eq!(
            claims.lookup_string("info.roles.0").as_deref(),
            Some("Editor")
        );
        assert_eq!(claims.lookup_string("info.org").as_deref(), Some("main"));
        assert_eq!(claims.lookup("info.missing"), None);
        assert_eq!(
            claims.lookup_string_list("info.roles"),
            vec!["Editor".to_string(), "Viewer".to_string()]
        );
        assert!(claims.expiry().is_some());
    }

    #[test]
    fn test_name_fallback_order() {
        let mut identity = Identity::new(TypedId::user(1));
        identity.email = "a@example.com".to_string();
        assert_eq!(identity.name_or_fallback(), "a@example.com");
        identity.login = "alice".to_string();
        assert_eq!(identity.name_or_fallback(), "alice");
        identity.name = "Alice".to_string();
        assert_eq!(identity.name_or_fallback(), "Alice");
    }

    #[test]
    fn test_from_external_carries_org_roles_independently_of_sync_flag() {
        let mut org_roles = HashMap::new();
        org_roles.insert(1, OrgRole::Editor);
        org_roles.insert(3, OrgRole::Viewer);
        let info = ExternalUserInfo {
            auth_module: auth_module::LDAP.to_string(),
            auth_id: "cn=alice,ou=users".to_string(),
            login: "alice".to_string(),
            org_roles: org_roles.clone(),
            ..Default::default()
        };

        let params = ClientParams {
            sync_user: true,
            sync_org_roles: false,
            ..Default::default()
        };
        let identity = Identity::from_external(&info, params);

        assert!(!identity.client_params.sync_org_roles);
        assert_eq!(identity.org_roles, org_roles);
        assert_eq!(identity.authenticated_by, auth_module::LDAP);
    }
}

//! Authentication configuration
//!
//! Loaded from an optional `warden` config file overlaid with environment
//! variables under the `WARDEN__` prefix, e.g. `WARDEN__AUTH__SIGNING_SECRET`.

use serde::Deserialize;
use std::collections::HashMap;

use warden_core::{AuthnError, Result};
use warden_oauth::ConnectorConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub jwt: JwtAuthSettings,
    #[serde(default)]
    pub ext_jwt: ExtJwtSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub anonymous: AnonymousSettings,
    #[serde(default)]
    pub passwordless: PasswordlessSettings,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
    #[serde(default)]
    pub background: BackgroundSettings,
    /// Keyed by provider name, e.g. `oauth.github.client_id`.
    #[serde(default)]
    pub oauth: HashMap<String, ConnectorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub session_cookie_name: String,
    /// A session token older than this must rotate before it is trusted.
    pub token_rotation_interval_mins: i64,
    /// Secret mixed into OAuth state hashes and used to sign forwarded
    /// identity tokens.
    pub signing_secret: String,
    pub issuer: String,
    pub signup_allowed: bool,
    pub lockout_max_attempts: u32,
    pub lockout_window_mins: u64,
    /// Mint a downstream-signed identity token during sync.
    pub id_token_enabled: bool,
    pub id_token_ttl_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_cookie_name: "warden_session".to_string(),
            token_rotation_interval_mins: 10,
            signing_secret: String::new(),
            issuer: "warden".to_string(),
            signup_allowed: true,
            lockout_max_attempts: 5,
            lockout_window_mins: 5,
            id_token_enabled: false,
            id_token_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JwtAuthSettings {
    pub enabled: bool,
    pub header_name: String,
    /// Accept the token from the `auth_token` query parameter as well.
    pub url_login: bool,
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Dot-path claim locations, e.g. `info.identity.login`.
    pub username_attribute_path: String,
    pub email_attribute_path: String,
    pub name_attribute_path: String,
    pub role_attribute_path: String,
    pub groups_attribute_path: String,
    /// `OrgName:OrgId:Role` entries mapping provider org names to internal
    /// org memberships. `*` matches any provider org.
    pub org_mapping: Vec<String>,
    pub allow_sign_up: bool,
    pub skip_org_role_sync: bool,
    /// Whether a `ServerAdmin` role claim may grant the server-admin flag.
    pub allow_assign_server_admin: bool,
    /// Org a bare role claim applies to when no org mapping matches.
    pub auto_assign_org_id: i64,
}

impl Default for JwtAuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "X-JWT-Assertion".to_string(),
            url_login: false,
            secret: String::new(),
            issuer: None,
            audience: None,
            username_attribute_path: "preferred_username".to_string(),
            email_attribute_path: "email".to_string(),
            name_attribute_path: "name".to_string(),
            role_attribute_path: String::new(),
            groups_attribute_path: String::new(),
            org_mapping: Vec::new(),
            allow_sign_up: true,
            skip_org_role_sync: false,
            allow_assign_server_admin: false,
            auto_assign_org_id: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtJwtSettings {
    pub enabled: bool,
    /// Namespace this deployment accepts; `*` in a token matches any.
    pub expected_namespace: String,
    pub access_token_secret: String,
    pub id_token_secret: String,
    pub issuer: Option<String>,
}

impl Default for ExtJwtSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            expected_namespace: "default".to_string(),
            access_token_secret: String::new(),
            id_token_secret: String::new(),
            issuer: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub header_name: String,
    /// Which attribute the main header carries, `username` or `email`.
    pub header_property: String,
    /// Extra attribute headers, keyed by `Name`/`Email`/`Login`/`Role`/`Groups`.
    pub headers: HashMap<String, String>,
    /// Source addresses allowed to present proxy headers. Empty means any.
    pub accept_from: Vec<String>,
    /// How long one set of proxy headers stays trusted without re-syncing.
    pub sync_ttl_mins: u64,
    /// Mint a first-party session token for proxy-authenticated users.
    pub enable_login_token: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "X-WEBAUTH-USER".to_string(),
            header_property: "username".to_string(),
            headers: HashMap::new(),
            accept_from: Vec::new(),
            sync_ttl_mins: 60,
            enable_login_token: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnonymousSettings {
    pub enabled: bool,
    pub org_name: String,
    pub org_role: String,
}

impl Default for AnonymousSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            org_name: String::new(),
            org_role: "Viewer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordlessSettings {
    pub enabled: bool,
    /// Emailed login codes expire after this long.
    pub code_ttl_mins: u64,
}

impl Default for PasswordlessSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            code_ttl_mins: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    pub enabled: bool,
    /// Shared secret the provisioning system signs webhook bodies with.
    pub signing_secret: String,
    pub signature_header: String,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            signing_secret: String::new(),
            signature_header: "X-Warden-Signature".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    pub workers: usize,
    pub queue_size: usize,
    /// Skip last-seen writes newer than this.
    pub last_seen_debounce_mins: i64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 512,
            last_seen_debounce_mins: 5,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            // Load from config file if present
            .add_source(config::File::with_name("config/warden").required(false))
            .add_source(config::File::with_name("warden").required(false))
            // Load from environment variables with WARDEN_ prefix
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AuthnError::internal(format!("failed to load configuration: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AuthnError::internal(format!("invalid configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.auth.session_cookie_name, "warden_session");
        assert_eq!(settings.auth.token_rotation_interval_mins, 10);
        assert!(!settings.jwt.enabled);
        assert!(settings.oauth.is_empty());
        assert_eq!(settings.background.workers, 4);
        assert_eq!(settings.passwordless.code_ttl_mins, 20);
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [auth]
                session_cookie_name = "custom_session"

                [oauth.github]
                name = "github"
                client_id = "id"
                client_secret = "secret"
                auth_url = "https://github.example.com/authorize"
                token_url = "https://github.example.com/token"
                user_info_url = "https://github.example.com/user"
                redirect_uri = "https://warden.example.com/login/github"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let settings: Settings = config.try_deserialize().unwrap();
        assert_eq!(settings.auth.session_cookie_name, "custom_session");
        // Untouched sections keep their defaults.
        assert_eq!(settings.auth.lockout_max_attempts, 5);
        assert_eq!(settings.oauth["github"].client_id, "id");
    }
}

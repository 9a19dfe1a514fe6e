//! ldap3-backed directory service
//!
//! Default [`LdapService`] implementation: a service-account bind runs the
//! subtree search for the entry, then the entry's own DN is bound with the
//! presented password for verification. Group DNs map to org roles through
//! ordered config mappings.

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

use warden_core::{
    auth_module, AuthnError, ExternalUserInfo, LdapService, OrgRole, Result,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LdapBackendConfig {
    pub server_url: String,
    pub start_tls: bool,
    /// Service account used for the search phase.
    pub bind_dn: String,
    pub bind_password: String,
    pub search_base_dn: String,
    /// `%s` is replaced with the escaped username.
    pub search_filter: String,
    pub attributes: LdapAttributeMap,
    /// Checked in order; the first match per org wins.
    pub group_mappings: Vec<LdapGroupMapping>,
}

impl Default for LdapBackendConfig {
    fn default() -> Self {
        Self {
            server_url: "ldap://localhost:389".to_string(),
            start_tls: false,
            bind_dn: String::new(),
            bind_password: String::new(),
            search_base_dn: String::new(),
            search_filter: "(cn=%s)".to_string(),
            attributes: LdapAttributeMap::default(),
            group_mappings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LdapAttributeMap {
    pub username: String,
    pub name: String,
    pub email: String,
    pub member_of: String,
}

impl Default for LdapAttributeMap {
    fn default() -> Self {
        Self {
            username: "cn".to_string(),
            name: "displayName".to_string(),
            email: "mail".to_string(),
            member_of: "memberOf".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LdapGroupMapping {
    pub group_dn: String,
    pub org_id: i64,
    pub org_role: OrgRole,
    #[serde(default)]
    pub server_admin: Option<bool>,
}

pub struct LdapBackend {
    config: LdapBackendConfig,
}

impl LdapBackend {
    pub fn new(config: LdapBackendConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new().set_starttls(self.config.start_tls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.server_url)
            .await
            .map_err(|e| AuthnError::internal(format!("LDAP connection failed: {}", e)))?;

        ldap3::drive!(conn);

        ldap.simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .map_err(|e| AuthnError::internal(format!("LDAP service bind failed: {}", e)))?
            .success()
            .map_err(|e| AuthnError::internal(format!("LDAP service bind rejected: {}", e)))?;

        Ok(ldap)
    }

    fn build_filter(&self, username: &str) -> String {
        self.config
            .search_filter
            .replace("%s", &ldap_escape(username))
    }

    async fn find_entry(&self, ldap: &mut Ldap, username: &str) -> Result<SearchEntry> {
        let (rs, _result) = ldap
            .search(
                &self.config.search_base_dn,
                Scope::Subtree,
                &self.build_filter(username),
                vec!["*"],
            )
            .await
            .map_err(|e| AuthnError::internal(format!("LDAP search failed: {}", e)))?
            .success()
            .map_err(|e| AuthnError::internal(format!("LDAP search failed: {}", e)))?;

        let mut entries = rs.into_iter();
        let entry = entries
            .next()
            .ok_or_else(|| AuthnError::identity_not_found("no matching directory entry"))?;
        if entries.next().is_some() {
            debug!(username, "directory search matched multiple entries, using the first");
        }
        Ok(SearchEntry::construct(entry))
    }

    fn entry_to_info(&self, entry: &SearchEntry, fallback_login: &str) -> ExternalUserInfo {
        let attrs = &self.config.attributes;
        let get_attr = |name: &str| -> Option<String> { entry.attrs.get(name)?.first().cloned() };

        let groups = entry
            .attrs
            .get(&attrs.member_of)
            .cloned()
            .unwrap_or_default();

        let mut org_roles = HashMap::new();
        let mut is_server_admin = None;
        for mapping in &self.config.group_mappings {
            let matched = groups
                .iter()
                .any(|g| g.eq_ignore_ascii_case(&mapping.group_dn));
            if !matched {
                continue;
            }
            org_roles.entry(mapping.org_id).or_insert(mapping.org_role);
            if is_server_admin.is_none() {
                is_server_admin = mapping.server_admin;
            }
        }

        ExternalUserInfo {
            auth_module: auth_module::LDAP.to_string(),
            auth_id: entry.dn.clone(),
            user_id: None,
            email: get_attr(&attrs.email).unwrap_or_default(),
            login: get_attr(&attrs.username).unwrap_or_else(|| fallback_login.to_string()),
            name: get_attr(&attrs.name).unwrap_or_default(),
            groups,
            org_roles,
            is_server_admin,
            is_disabled: false,
        }
    }
}

#[async_trait]
impl LdapService for LdapBackend {
    #[instrument(skip_all, fields(username))]
    async fn login(&self, username: &str, password: &str) -> Result<ExternalUserInfo> {
        // An empty password would turn the verification bind into an
        // anonymous bind, which directories accept.
        if password.is_empty() {
            return Err(AuthnError::invalid_credentials("empty password"));
        }

        let mut ldap = self.connect().await?;
        let entry = match self.find_entry(&mut ldap, username).await {
            Ok(entry) => entry,
            Err(e) => {
                ldap.unbind().await.ok();
                return Err(e);
            }
        };

        // Rebind as the entry itself to verify the password.
        let bind = ldap
            .simple_bind(&entry.dn, password)
            .await
            .map_err(|e| AuthnError::internal(format!("LDAP bind failed: {}", e)))?
            .success();
        ldap.unbind().await.ok();
        if bind.is_err() {
            return Err(AuthnError::invalid_credentials("directory bind rejected"));
        }

        Ok(self.entry_to_info(&entry, username))
    }

    #[instrument(skip_all, fields(username))]
    async fn get_user(&self, username: &str) -> Result<ExternalUserInfo> {
        let mut ldap = self.connect().await?;
        let entry = self.find_entry(&mut ldap, username).await;
        ldap.unbind().await.ok();
        Ok(self.entry_to_info(&entry?, username))
    }
}

//! JWT header client
//!
//! Verifies a token presented in a configurable header and maps its claims
//! to an identity through configurable dot-path expressions. Provider org
//! names resolve to internal org memberships through the org-mapping table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

use warden_core::{
    auth_module, AuthnError, ClientParams, ExternalUserInfo, Identity, OrgRole, Request, Result,
    TokenClaims, TokenVerifier,
};

use crate::config::JwtAuthSettings;

use super::{client_name, priority, AuthnClient, SERVER_ADMIN_ROLE};

/// Rough shape check: three non-empty dot-separated segments.
pub(crate) fn looks_like_jwt(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}

/// Parsed `ExternalOrg:OrgId:Role` table. `*` as the external org matches
/// anything.
pub(crate) struct OrgMapping {
    entries: Vec<(String, i64, OrgRole)>,
}

impl OrgMapping {
    pub(crate) fn parse(raw: &[String]) -> Self {
        let mut entries = Vec::new();
        for entry in raw {
            let parts: Vec<&str> = entry.split(':').collect();
            let parsed = match parts.as_slice() {
                [external, org_id, role] => org_id
                    .parse::<i64>()
                    .ok()
                    .zip(role.parse::<OrgRole>().ok())
                    .map(|(org_id, role)| (external.to_string(), org_id, role)),
                _ => None,
            };
            match parsed {
                Some(entry) => entries.push(entry),
                None => warn!(entry, "skipping malformed org mapping entry"),
            }
        }
        Self { entries }
    }

    /// Memberships granted by the provider org names, keeping the highest
    /// role when several entries hit the same org.
    pub(crate) fn resolve(&self, external_orgs: &[String]) -> HashMap<i64, OrgRole> {
        let mut roles: HashMap<i64, OrgRole> = HashMap::new();
        for (external, org_id, role) in &self.entries {
            let matches = external == "*" || external_orgs.iter().any(|o| o == external);
            if matches {
                roles
                    .entry(*org_id)
                    .and_modify(|r| *r = (*r).max(*role))
                    .or_insert(*role);
            }
        }
        roles
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct JwtClient {
    verifier: Arc<dyn TokenVerifier>,
    settings: JwtAuthSettings,
    org_mapping: OrgMapping,
}

impl JwtClient {
    pub fn new(verifier: Arc<dyn TokenVerifier>, settings: JwtAuthSettings) -> Self {
        let org_mapping = OrgMapping::parse(&settings.org_mapping);
        Self {
            verifier,
            settings,
            org_mapping,
        }
    }

    fn token_from_request(&self, req: &Request) -> Option<String> {
        let from_header = if self.settings.header_name.eq_ignore_ascii_case("authorization") {
            super::bearer_token(req).map(str::to_string)
        } else {
            req.header_str(&self.settings.header_name)
                .map(|t| t.trim().to_string())
        };
        from_header
            .or_else(|| {
                if self.settings.url_login {
                    req.query_param("auth_token")
                } else {
                    None
                }
            })
            .filter(|t| looks_like_jwt(t))
    }

    fn lookup(&self, claims: &TokenClaims, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        claims.lookup_string(path).filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl AuthnClient for JwtClient {
    fn name(&self) -> &str {
        client_name::JWT
    }

    fn test(&self, req: &Request) -> bool {
        self.settings.enabled && self.token_from_request(req).is_some()
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let token = self
            .token_from_request(req)
            .ok_or_else(|| AuthnError::invalid_token("no jwt in request"))?;
        let claims = self.verifier.verify(&token).await?;

        let subject = claims
            .subject()
            .ok_or_else(|| AuthnError::invalid_token("missing sub claim"))?;

        let login = self
            .lookup(&claims, &self.settings.username_attribute_path)
            .unwrap_or_default();
        let email = self
            .lookup(&claims, &self.settings.email_attribute_path)
            .unwrap_or_default();
        if login.is_empty() && email.is_empty() {
            return Err(AuthnError::invalid_token(
                "token carries neither username nor email claim",
            ));
        }
        let name = self
            .lookup(&claims, &self.settings.name_attribute_path)
            .unwrap_or_default();

        let mut org_roles = HashMap::new();
        let mut is_server_admin = None;
        if let Some(role) = self.lookup(&claims, &self.settings.role_attribute_path) {
            if role == SERVER_ADMIN_ROLE {
                // The sentinel always grants org admin; the server-wide flag
                // needs the explicit toggle.
                if self.settings.allow_assign_server_admin {
                    is_server_admin = Some(true);
                }
                org_roles.insert(self.settings.auto_assign_org_id, OrgRole::Admin);
            } else if let Ok(role) = role.parse::<OrgRole>() {
                org_roles.insert(self.settings.auto_assign_org_id, role);
            }
        }

        let groups = if self.settings.groups_attribute_path.is_empty() {
            Vec::new()
        } else {
            claims.lookup_string_list(&self.settings.groups_attribute_path)
        };
        if !self.org_mapping.is_empty() {
            for (org_id, role) in self.org_mapping.resolve(&groups) {
                org_roles
                    .entry(org_id)
                    .and_modify(|r| *r = (*r).max(role))
                    .or_insert(role);
            }
        }

        let external = ExternalUserInfo {
            auth_module: auth_module::JWT.to_string(),
            auth_id: subject,
            user_id: None,
            email,
            login,
            name,
            groups,
            org_roles,
            is_server_admin,
            is_disabled: false,
        };

        let mut identity = Identity::from_external(
            &external,
            ClientParams {
                sync_user: true,
                allow_sign_up: self.settings.allow_sign_up,
                fetch_synced_user: true,
                sync_permissions: true,
                sync_org_roles: !self.settings.skip_org_role_sync
                    && !external.org_roles.is_empty(),
                ..ClientParams::default()
            },
        );
        identity.id_token_claims = Some(claims);
        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::JWT
    }
}

//! Extended JWT client for service-to-service calls
//!
//! Verifies a separately issued access token (the calling service's
//! identity, an access policy) and, when present, an id token naming the
//! user the call is made on behalf of. The two tokens must agree on
//! namespace: equal, or a wildcard in the access token.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{
    auth_module, AuthnError, ClientParams, FetchPermissionsParams, Identity, IdentityType,
    Request, Result, TokenClaims, TokenVerifier, TypedId,
};
use warden_oauth::decode_unverified_claims;

use crate::config::ExtJwtSettings;

use super::jwt::looks_like_jwt;
use super::{client_name, priority, AuthnClient};

pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
pub const ID_TOKEN_HEADER: &str = "X-Warden-Id";

const WILDCARD_NAMESPACE: &str = "*";

pub struct ExtJwtClient {
    access_verifier: Arc<dyn TokenVerifier>,
    id_verifier: Arc<dyn TokenVerifier>,
    settings: ExtJwtSettings,
}

impl ExtJwtClient {
    pub fn new(
        access_verifier: Arc<dyn TokenVerifier>,
        id_verifier: Arc<dyn TokenVerifier>,
        settings: ExtJwtSettings,
    ) -> Self {
        Self {
            access_verifier,
            id_verifier,
            settings,
        }
    }

    fn namespace_allowed(&self, namespace: &str) -> bool {
        namespace == WILDCARD_NAMESPACE || namespace == self.settings.expected_namespace
    }

    fn token_from_request<'r>(req: &'r Request) -> Option<&'r str> {
        match req.header_str(ACCESS_TOKEN_HEADER) {
            Some(token) => Some(token.trim()),
            None => super::bearer_token(req),
        }
    }

    fn typed_subject(claims: &TokenClaims, expected: IdentityType) -> Result<TypedId> {
        let subject = claims
            .subject()
            .ok_or_else(|| AuthnError::invalid_token("missing sub claim"))?;
        let id = TypedId::from_str(&subject)
            .map_err(|_| AuthnError::invalid_token("malformed sub claim"))?;
        if id.id_type() != expected {
            return Err(AuthnError::unexpected_identity_type(
                id.id_type().to_string(),
            ));
        }
        Ok(id)
    }
}

#[async_trait]
impl AuthnClient for ExtJwtClient {
    fn name(&self) -> &str {
        client_name::EXTENDED_JWT
    }

    fn test(&self, req: &Request) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let Some(token) = Self::token_from_request(req) else {
            return false;
        };
        if !looks_like_jwt(token) {
            return false;
        }
        // The Authorization fallback is shared with ordinary user JWTs; an
        // unverified issuer peek keeps those for the jwt client.
        match &self.settings.issuer {
            Some(issuer) => decode_unverified_claims(token)
                .ok()
                .and_then(|claims| claims.lookup_string("iss"))
                .map(|iss| iss == *issuer)
                .unwrap_or(false),
            None => true,
        }
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let access_raw = Self::token_from_request(req)
            .ok_or_else(|| AuthnError::invalid_token("no access token in request"))?;
        let access_claims = self.access_verifier.verify(access_raw).await?;

        let policy_id = Self::typed_subject(&access_claims, IdentityType::AccessPolicy)?;
        let access_namespace = access_claims
            .namespace()
            .ok_or_else(|| AuthnError::invalid_token("access token missing namespace claim"))?;
        if !self.namespace_allowed(&access_namespace) {
            return Err(AuthnError::forbidden(format!(
                "namespace {access_namespace} not served here",
            )));
        }

        let org_id = match req.org_id() {
            0 => 1,
            org_id => org_id,
        };

        match req.header_str(ID_TOKEN_HEADER) {
            Some(id_raw) => {
                let id_claims = self.id_verifier.verify(id_raw).await?;
                let user_id = Self::typed_subject(&id_claims, IdentityType::User)?;

                let id_namespace = id_claims
                    .namespace()
                    .ok_or_else(|| AuthnError::invalid_token("id token missing namespace claim"))?;
                if access_namespace != WILDCARD_NAMESPACE && id_namespace != access_namespace {
                    return Err(AuthnError::NamespaceMismatch {
                        access: access_namespace,
                        id: id_namespace,
                    });
                }

                let actions = access_claims.lookup_string_list("delegatedPermissions");

                let mut identity = Identity::new(user_id);
                identity.org_id = org_id;
                identity.namespace = id_namespace;
                identity.authenticated_by = auth_module::EXT_JWT.to_string();
                identity.access_token_claims = Some(access_claims);
                identity.id_token_claims = Some(id_claims);
                identity.client_params = ClientParams {
                    fetch_synced_user: true,
                    sync_permissions: true,
                    fetch_permissions_params: (!actions.is_empty()).then(|| {
                        FetchPermissionsParams {
                            actions_lookup: actions,
                            roles: Vec::new(),
                        }
                    }),
                    ..ClientParams::default()
                };
                Ok(identity)
            }
            None => {
                // The calling service acts as itself.
                let actions = access_claims.lookup_string_list("permissions");

                let mut identity = Identity::new(policy_id);
                identity.org_id = org_id;
                identity.namespace = access_namespace;
                identity.authenticated_by = auth_module::EXT_JWT.to_string();
                identity.access_token_claims = Some(access_claims);
                identity.client_params = ClientParams {
                    sync_permissions: true,
                    fetch_permissions_params: (!actions.is_empty()).then(|| {
                        FetchPermissionsParams {
                            actions_lookup: actions,
                            roles: Vec::new(),
                        }
                    }),
                    ..ClientParams::default()
                };
                Ok(identity)
            }
        }
    }

    fn priority(&self) -> u32 {
        priority::EXTENDED_JWT
    }
}

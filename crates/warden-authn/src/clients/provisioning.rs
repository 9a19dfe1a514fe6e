//! Provisioning webhook client
//!
//! Machine calls from the tenant-provisioning system carry an HMAC-SHA256
//! signature over the raw request body, `sha256=<hex>` in the signature
//! header. The resulting identity has no backing record and runs no sync
//! hooks.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::instrument;

use warden_core::{auth_module, AuthnError, Identity, IdentityType, Request, Result, TypedId};

use crate::config::ProvisioningSettings;

use super::{client_name, priority, AuthnClient};

type HmacSha256 = Hmac<Sha256>;

pub struct ProvisioningClient {
    settings: ProvisioningSettings,
}

impl ProvisioningClient {
    pub fn new(settings: ProvisioningSettings) -> Self {
        Self { settings }
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.settings.signing_secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(payload);

        let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = match hex::decode(hex_part) {
            Ok(b) => b,
            Err(_) => return false,
        };

        // Constant-time compare.
        mac.verify_slice(&expected).is_ok()
    }
}

#[async_trait]
impl AuthnClient for ProvisioningClient {
    fn name(&self) -> &str {
        client_name::PROVISIONING
    }

    fn test(&self, req: &Request) -> bool {
        self.settings.enabled
            && req
                .header_str(&self.settings.signature_header)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        if self.settings.signing_secret.is_empty() {
            return Err(AuthnError::internal(
                "provisioning signing secret is not configured",
            ));
        }

        let signature = req
            .header_str(&self.settings.signature_header)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthnError::invalid_credentials("missing provisioning signature"))?;

        if !self.verify_signature(&req.body, signature) {
            return Err(AuthnError::invalid_credentials(
                "provisioning signature mismatch",
            ));
        }

        let mut identity = Identity::new(TypedId::new(IdentityType::Provisioning, "0"));
        identity.org_id = req.org_id();
        identity.authenticated_by = auth_module::PROVISIONING.to_string();
        Ok(identity)
    }

    fn priority(&self) -> u32 {
        priority::PROVISIONING
    }
}

//! Downstream identity-token minting
//!
//! Signs a short-lived token describing the settled identity for
//! forwarding to internal services. Signed tokens are cached per
//! `(identity, org)` so repeat requests inside the TTL skip the signer.

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use std::time::Duration;
use tracing::{instrument, warn};

use warden_core::{Identity, IdentityType, Request, Result, TypedId};
use warden_oauth::{IdTokenSigner, SignedIdToken};

use crate::config::AuthSettings;

use super::SyncHook;

pub struct IdTokenSync {
    signer: IdTokenSigner,
    enabled: bool,
    cache: Cache<(TypedId, i64), SignedIdToken>,
}

impl IdTokenSync {
    pub fn new(settings: &AuthSettings, signer: IdTokenSigner) -> Self {
        // Cache entries expire ahead of the token's own exp claim.
        let ttl = (settings.id_token_ttl_secs - 30).max(30) as u64;
        Self {
            signer,
            enabled: settings.id_token_enabled,
            cache: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(Duration::from_secs(ttl))
                .build(),
        }
    }
}

#[async_trait]
impl SyncHook for IdTokenSync {
    fn name(&self) -> &'static str {
        "sync.id-token"
    }

    #[instrument(skip_all, fields(id = %identity.id))]
    async fn run(&self, identity: &mut Identity, _req: &Request) -> Result<()> {
        if !self.enabled
            || !matches!(
                identity.id_type(),
                IdentityType::User | IdentityType::ServiceAccount
            )
        {
            return Ok(());
        }

        let key = (identity.id.clone(), identity.org_id);
        if let Some(cached) = self.cache.get(&key).await {
            if cached.expires_at > Utc::now() {
                identity.id_token = cached.token;
                return Ok(());
            }
        }

        match self.signer.sign(identity) {
            Ok(signed) => {
                identity.id_token = signed.token.clone();
                self.cache.insert(key, signed).await;
                Ok(())
            }
            Err(e) => {
                // The resolved identity stands on its own without the token.
                warn!(error = %e, "failed to sign identity token");
                Ok(())
            }
        }
    }
}

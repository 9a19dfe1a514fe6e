//! Post-authentication sync pipeline
//!
//! An ordered sequence of hooks, each mutating the resolved identity in
//! place. Every hook guards itself on the relevant `ClientParams` flag and
//! identity type, so the pipeline runs unconditionally for every identity
//! kind. Order is a first-class artifact: hooks register at the positions
//! below, never by accident of registration code.

pub mod enable_disabled;
pub mod fetch_user;
pub mod id_token_sync;
pub mod last_seen;
pub mod oauth_token_sync;
pub mod org_sync;
pub mod proxy_session;
pub mod rbac_sync;
pub mod user_sync;

use async_trait::async_trait;
use warden_core::{Identity, Request, Result};

/// Pipeline positions. Lower runs first.
pub mod hook_order {
    pub const USER_SYNC: u32 = 10;
    pub const ENABLE_DISABLED_USER_SYNC: u32 = 20;
    pub const ORG_SYNC: u32 = 30;
    pub const FETCH_SYNCED_USER_SYNC: u32 = 40;
    pub const PERMISSIONS_SYNC: u32 = 50;
    pub const OAUTH_TOKEN_SYNC: u32 = 60;
    pub const PROXY_SESSION_SYNC: u32 = 70;
    pub const LAST_SEEN_SYNC: u32 = 80;
    pub const ID_TOKEN_SYNC: u32 = 90;
    /// Runs last so it observes the account id the pipeline settled on.
    pub const PROXY_CACHE_SYNC: u32 = 95;
}

/// One reconciliation step. An error aborts the remaining pipeline and is
/// returned to the caller.
#[async_trait]
pub trait SyncHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, identity: &mut Identity, req: &Request) -> Result<()>;
}

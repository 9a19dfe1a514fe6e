//! Authentication clients
//!
//! One module per strategy, all behind the shared probe+authenticate
//! contract. `test` disambiguates (header/cookie presence, URL shape) and
//! must never authenticate; `authenticate` is the authoritative check. A
//! client whose `test` matches too eagerly will eat requests meant for a
//! lower-priority client, so probes are kept narrow.

pub mod anonymous;
pub mod api_key;
pub mod basic;
pub mod database;
pub mod ext_jwt;
pub mod form;
pub mod jwt;
pub mod ldap;
pub mod oauth;
pub mod password;
pub mod passwordless;
pub mod provisioning;
pub mod proxy;
pub mod radius;
pub mod session;

use async_trait::async_trait;
use warden_core::{Identity, Redirect, Request, Result};

/// Registered client names.
pub mod client_name {
    pub const SESSION: &str = "auth.client.session";
    pub const API_KEY: &str = "auth.client.api-key";
    pub const PASSWORD: &str = "auth.client.password";
    pub const BASIC: &str = "auth.client.basic";
    pub const FORM: &str = "auth.client.form";
    pub const JWT: &str = "auth.client.jwt";
    pub const EXTENDED_JWT: &str = "auth.client.extended-jwt";
    pub const PROXY: &str = "auth.client.proxy";
    pub const ANONYMOUS: &str = "auth.client.anonymous";
    pub const PASSWORDLESS: &str = "auth.client.passwordless";
    pub const PROVISIONING: &str = "auth.client.provisioning";

    /// OAuth clients register per provider as `auth.client.oauth_<provider>`.
    pub fn oauth(provider: &str) -> String {
        format!("auth.client.{}", warden_core::auth_module::oauth(provider))
    }
}

/// Dispatch priorities. Lower values are probed first; ties resolve by
/// registration order.
pub mod priority {
    pub const PROVISIONING: u32 = 10;
    pub const EXTENDED_JWT: u32 = 15;
    pub const SESSION: u32 = 20;
    pub const API_KEY: u32 = 30;
    pub const JWT: u32 = 35;
    pub const BASIC: u32 = 40;
    pub const PROXY: u32 = 50;
    pub const OAUTH: u32 = 60;
    pub const PASSWORDLESS: u32 = 70;
    /// Catch-all, always probed last.
    pub const ANONYMOUS: u32 = 100;
}

/// Sentinel role value granting the server-admin flag when a provider
/// reports it.
pub(crate) const SERVER_ADMIN_ROLE: &str = "ServerAdmin";

#[async_trait]
pub trait AuthnClient: Send + Sync {
    /// Registered name, one of the `auth.client.*` values.
    fn name(&self) -> &str;

    /// Cheap applicability probe. Must not perform credential checks.
    fn test(&self, req: &Request) -> bool;

    /// Authoritative credential check. An error here is terminal for the
    /// request; the dispatcher never falls through to another client.
    async fn authenticate(&self, req: &Request) -> Result<Identity>;

    fn priority(&self) -> u32;
}

/// Ordered backends behind the password composite client.
#[async_trait]
pub trait PasswordSubClient: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate_password(
        &self,
        req: &Request,
        username: &str,
        password: &str,
    ) -> Result<Identity>;
}

/// Clients that begin with a redirect to an external party (OAuth2,
/// passwordless email) before they can authenticate the callback.
#[async_trait]
pub trait RedirectClient: AuthnClient {
    async fn redirect_url(&self, req: &Request) -> Result<Redirect>;
}

/// Token following `Authorization: Bearer `, if the header has that shape.
pub(crate) fn bearer_token(req: &Request) -> Option<&str> {
    req.header(http::header::AUTHORIZATION)
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Decoded `username:password` pair from `Authorization: Basic `.
pub(crate) fn basic_credentials(req: &Request) -> Option<(String, String)> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let encoded = req
        .header(http::header::AUTHORIZATION)?
        .strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

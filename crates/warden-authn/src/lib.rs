//! Warden Authn - Multi-strategy authentication and identity reconciliation
//!
//! This crate resolves a request to exactly one identity through pluggable
//! authentication strategies:
//! - Session cookies with rotation
//! - API keys and basic credentials
//! - Password backends (database, LDAP, RADIUS) with lockout
//! - OAuth2/OIDC providers with PKCE and token refresh
//! - Signed JWTs, trusted reverse proxies, provisioning webhooks
//! - Passwordless email codes and anonymous access
//!
//! # Architecture
//!
//! The system is built around two core traits:
//! - `AuthnClient`: A strategy with a cheap applicability probe and an
//!   authoritative credential check. The `Authenticator` dispatches each
//!   request to the first matching client by priority, with no fall-through.
//! - `SyncHook`: One step of the ordered post-auth pipeline that reconciles
//!   the external identity against local accounts, orgs, and permissions.
//!
//! Every collaborator (user store, org store, token store) is injected as a
//! trait object; nothing in here reaches for globals.

pub mod authenticator;
pub mod background;
pub mod clients;
pub mod config;
pub mod lockout;
pub mod password_hash;
pub mod sync;

#[cfg(feature = "ldap")]
pub mod ldap_backend;


// Re-export the dispatcher and the contracts clients implement
pub use authenticator::Authenticator;
pub use clients::{client_name, priority, AuthnClient, PasswordSubClient, RedirectClient};
pub use sync::{hook_order, SyncHook};

// Re-export configuration
pub use config::Settings;

#[cfg(feature = "ldap")]
pub use ldap_backend::{LdapBackend, LdapBackendConfig};

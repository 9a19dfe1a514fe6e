//! OAuth/OIDC plumbing for Warden: provider connectors, authorization-state
//! and PKCE handling, JWT verification and signing, and the token refresh
//! manager with its cross-instance locking.

pub mod connector;
pub mod lock;
pub mod refresh;
pub mod signer;
pub mod singleflight;
pub mod state;
pub mod verify;

pub use connector::{ConnectorConfig, HttpConnector};
pub use lock::{acquire_with_retries, LockRetryConfig, MemoryServerLock, ServerLock};
pub use refresh::{needs_refresh, RefreshConfig, TokenRefresher};
pub use signer::{IdTokenSigner, SignedIdToken};
pub use singleflight::Group;
pub use state::{generate_pkce_verifier, generate_state, hash_state, pkce_challenge, verify_state};
pub use verify::{decode_unverified_claims, JwtVerifier};

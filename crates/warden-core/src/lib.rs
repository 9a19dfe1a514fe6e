//! Warden Core - Identity model, error taxonomy, and collaborator traits

pub mod error;
pub mod identity;
pub mod ids;
pub mod request;
pub mod secrets;
pub mod services;
pub mod session;

pub use error::*;
pub use identity::*;
pub use ids::*;
pub use request::*;
pub use secrets::*;
pub use services::*;
pub use session::*;

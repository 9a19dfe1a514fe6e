//! Namespaced identity identifiers
//!
//! Every identity id carries its kind as a namespace prefix
//! (`user:3`, `api-key:7`, `service-account:12`), so an id string is always
//! interpretable as `(IdentityType, raw id)` on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthnError;

/// Closed set of identity kinds this core resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityType {
    User,
    ApiKey,
    ServiceAccount,
    Anonymous,
    AccessPolicy,
    Provisioning,
}

impl IdentityType {
    /// Only identity kinds with a persisted backing record can be looked up
    /// or mutated by the sync hooks.
    pub fn has_persisted_record(&self) -> bool {
        matches!(
            self,
            IdentityType::User | IdentityType::ApiKey | IdentityType::ServiceAccount
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityType::User => "user",
            IdentityType::ApiKey => "api-key",
            IdentityType::ServiceAccount => "service-account",
            IdentityType::Anonymous => "anonymous",
            IdentityType::AccessPolicy => "access-policy",
            IdentityType::Provisioning => "provisioning",
        }
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdentityType {
    type Err = AuthnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(IdentityType::User),
            "api-key" => Ok(IdentityType::ApiKey),
            "service-account" => Ok(IdentityType::ServiceAccount),
            "anonymous" => Ok(IdentityType::Anonymous),
            "access-policy" => Ok(IdentityType::AccessPolicy),
            "provisioning" => Ok(IdentityType::Provisioning),
            other => Err(AuthnError::unexpected_identity_type(other)),
        }
    }
}

/// A namespaced identity id: `type:raw`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedId {
    id_type: IdentityType,
    raw: String,
}

impl TypedId {
    pub fn new(id_type: IdentityType, raw: impl Into<String>) -> Self {
        Self {
            id_type,
            raw: raw.into(),
        }
    }

    pub fn user(id: i64) -> Self {
        Self::new(IdentityType::User, id.to_string())
    }

    pub fn api_key(id: i64) -> Self {
        Self::new(IdentityType::ApiKey, id.to_string())
    }

    pub fn service_account(id: i64) -> Self {
        Self::new(IdentityType::ServiceAccount, id.to_string())
    }

    pub fn anonymous() -> Self {
        Self::new(IdentityType::Anonymous, "0")
    }

    pub fn id_type(&self) -> IdentityType {
        self.id_type
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The numeric backing-record id, when this id has one.
    pub fn record_id(&self) -> Option<i64> {
        if !self.id_type.has_persisted_record() {
            return None;
        }
        self.raw.parse().ok()
    }
}

impl fmt::Display for TypedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id_type, self.raw)
    }
}

impl FromStr for TypedId {
    type Err = AuthnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (prefix, raw) = s
            .split_once(':')
            .ok_or_else(|| AuthnError::bad_request(format!("malformed identity id: {}", s)))?;
        if raw.is_empty() {
            return Err(AuthnError::bad_request(format!(
                "malformed identity id: {}",
                s
            )));
        }
        Ok(Self {
            id_type: prefix.parse()?,
            raw: raw.to_string(),
        })
    }
}

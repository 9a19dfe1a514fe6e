//! First-party session tokens and persisted third-party token records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Rotating first-party session token. The stored value is a hash; the
/// cleartext exists only in the cookie handed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub id: i64,
    pub user_id: i64,
    /// Hash of the current token value.
    pub auth_token: String,
    /// Hash of the previous token value, kept during the rotation grace
    /// window so in-flight requests with the old cookie still resolve.
    pub prev_auth_token: String,
    pub token_seen: bool,
    pub client_ip: String,
    pub user_agent: String,
    pub rotated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Link to a third-party session record, when one is tracked.
    pub external_session_id: Option<i64>,
    /// Cleartext token value, populated only when the token was just minted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhashed_token: Option<String>,
}

impl SessionToken {
    /// A token overdue for rotation must not be trusted for identity
    /// resolution.
    pub fn needs_rotation(&self, interval: Duration) -> bool {
        Utc::now() - self.rotated_at > interval
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// In-memory third-party OAuth token bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    /// `None` means the provider reported no expiry.
    pub expiry: Option<DateTime<Utc>>,
    pub id_token: Option<String>,
}

impl OAuthToken {
    /// Two bundles are materially equal when persisting one over the other
    /// would change nothing.
    pub fn same_as(&self, other: &OAuthToken) -> bool {
        self.access_token == other.access_token
            && self.refresh_token == other.refresh_token
            && self.id_token == other.id_token
            && self.expiry == other.expiry
    }
}

/// Durable record binding `(user_id, auth_module, auth_id)` to the OAuth
/// token bundle issued for that link. A user can hold one row per module;
/// the most recently created row per module is current. Token fields are
/// encrypted and base64-encoded by the storing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuth {
    pub id: i64,
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
    pub oauth_access_token: String,
    pub oauth_refresh_token: Option<String>,
    pub oauth_id_token: Option<String>,
    pub oauth_token_type: String,
    pub oauth_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserAuth {
    pub fn oauth_token(&self) -> OAuthToken {
        OAuthToken {
            access_token: self.oauth_access_token.clone(),
            token_type: self.oauth_token_type.clone(),
            refresh_token: self.oauth_refresh_token.clone(),
            expiry: self.oauth_expiry,
            id_token: self.oauth_id_token.clone(),
        }
    }
}

/// Persisted snapshot of a third-party session, updated when a refresh
/// succeeds, bound to a first-party session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSession {
    pub id: i64,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_rotated(minutes_ago: i64) -> SessionToken {
        SessionToken {
            id: 1,
            user_id: 7,
            auth_token: "hash".to_string(),
            prev_auth_token: String::new(),
            token_seen: true,
            client_ip: "10.0.0.1".to_string(),
            user_agent: "test".to_string(),
            rotated_at: Utc::now() - Duration::minutes(minutes_ago),
            created_at: Utc::now() - Duration::hours(1),
            revoked_at: None,
            external_session_id: None,
            unhashed_token: None,
        }
    }

    #[test]
    fn test_needs_rotation_is_strictly_past_interval() {
        let interval = Duration::minutes(10);
        assert!(!token_rotated(0).needs_rotation(interval));
        assert!(!token_rotated(9).needs_rotation(interval));
        assert!(token_rotated(11).needs_rotation(interval));
        assert!(token_rotated(60).needs_rotation(interval));
    }

    #[test]
    fn test_token_material_change() {
        let token = OAuthToken {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("rt".to_string()),
            expiry: None,
            id_token: None,
        };
        let mut same = token.clone();
        same.token_type = "bearer".to_string();
        assert!(token.same_as(&same));

        let mut changed = token.clone();
        changed.access_token = "at2".to_string();
        assert!(!token.same_as(&changed));
    }
}

//! HTTP implementation of the OAuth provider connector

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use warden_core::{
    AuthnError, OAuthConnector, OAuthToken, ProviderUserInfo, Result, TokenClaims,
};

/// Endpoint and credential configuration for one provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Whether the provider issues refresh tokens (requires the matching
    /// scope, e.g. `offline_access`).
    #[serde(default)]
    pub use_refresh_token: bool,
}

/// Standard OAuth2 token-endpoint connector over HTTP.
pub struct HttpConnector {
    config: ConnectorConfig,
    http: reqwest::Client,
}

impl HttpConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<OAuthToken> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthnError::provider_error(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthnError::provider_error(format!(
                "Token request failed: {}",
                error_text
            )));
        }

        let body: HashMap<String, serde_json::Value> = response.json().await.map_err(|e| {
            AuthnError::provider_error(format!("Failed to parse token response: {}", e))
        })?;

        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthnError::provider_error("Missing access_token in response"))?
            .to_string();

        let expiry = body
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .map(|secs| Utc::now() + Duration::seconds(secs));

        Ok(OAuthToken {
            access_token,
            token_type: body
                .get("token_type")
                .and_then(|v| v.as_str())
                .unwrap_or("Bearer")
                .to_string(),
            refresh_token: body
                .get("refresh_token")
                .and_then(|v| v.as_str())
                .map(String::from),
            expiry,
            id_token: body
                .get("id_token")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }
}

#[async_trait]
impl OAuthConnector for HttpConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supports_refresh(&self) -> bool {
        self.config.use_refresh_token
    }

    fn auth_code_url(&self, state: &str, pkce_challenge: Option<&str>) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scopes.join(" ")),
            urlencoding::encode(state),
        );
        if let Some(challenge) = pkce_challenge {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method=S256",
                urlencoding::encode(challenge)
            ));
        }
        debug!(provider = %self.config.name, "generated authorization URL");
        url
    }

    #[instrument(skip(self, code, pkce_verifier))]
    async fn exchange(&self, code: &str, pkce_verifier: Option<&str>) -> Result<OAuthToken> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];
        if let Some(verifier) = pkce_verifier {
            params.push(("code_verifier", verifier));
        }

        let token = self.token_request(&params).await?;
        info!(provider = %self.config.name, "exchanged authorization code for tokens");
        Ok(token)
    }

    #[instrument(skip(self, token))]
    async fn user_info(&self, token: &OAuthToken) -> Result<ProviderUserInfo> {
        let response = self
            .http
            .get(&self.config.user_info_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AuthnError::provider_error(format!("Failed to fetch user info: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthnError::provider_error(format!(
                "Userinfo request failed with status: {}",
                response.status()
            )));
        }

        let claims: serde_json::Map<String, serde_json::Value> =
            response.json().await.map_err(|e| {
                AuthnError::provider_error(format!("Failed to parse user info: {}", e))
            })?;

        let get_str = |key: &str| {
            claims
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let subject = get_str("sub");
        if subject.is_empty() {
            return Err(AuthnError::provider_error("Missing 'sub' in userinfo response"));
        }

        let email = get_str("email");
        let login = {
            let preferred = get_str("preferred_username");
            if !preferred.is_empty() {
                preferred
            } else {
                email.clone()
            }
        };

        Ok(ProviderUserInfo {
            subject,
            login,
            email,
            name: get_str("name"),
            email_verified: claims
                .get("email_verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            role: claims
                .get("role")
                .and_then(|v| v.as_str())
                .map(String::from),
            groups: claims
                .get("groups")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            raw: TokenClaims(serde_json::Value::Object(claims)),
        })
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];
        let token = self.token_request(&params).await?;
        info!(provider = %self.config.name, "refreshed provider tokens");
        Ok(token)
    }
}

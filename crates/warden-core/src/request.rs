//! Transport-request wrapper consumed by authentication clients
//!
//! Carries only the pieces of the inbound HTTP request this core needs, so
//! no web framework leaks in. Redirect-based flows hand a [`Redirect`] back
//! to the HTTP layer instead of writing to a response.

use http::{HeaderMap, Method};
use std::collections::HashMap;

/// Request-scoped metadata keys.
pub mod meta {
    /// Which authentication module handled the request.
    pub const AUTH_MODULE: &str = "authModule";
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    pub headers: HeaderMap,
    /// Raw body bytes, for form logins and signed webhook payloads.
    pub body: Vec<u8>,
    pub client_ip: String,
    pub user_agent: String,
    org_id: i64,
    metadata: HashMap<String, String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: String::new(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            client_ip: String::new(),
            user_agent: String::new(),
            org_id: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = http::HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_org_id(mut self, org_id: i64) -> Self {
        self.org_id = org_id;
        self
    }

    /// Target org for this request: an explicitly set org wins, then the
    /// `targetOrgId` and `orgId` query parameters, then 0 (unset).
    pub fn org_id(&self) -> i64 {
        if self.org_id != 0 {
            return self.org_id;
        }
        self.query_param("targetOrgId")
            .or_else(|| self.query_param("orgId"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// First value of a header, when it is valid UTF-8.
    pub fn header(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw value of a named cookie. Callers unescape if the cookie was
    /// URL-encoded when set.
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers.get_all(http::header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                if let Some((k, v)) = pair.trim().split_once('=') {
                    if k == name {
                        return Some(v.trim_matches('"').to_string());
                    }
                }
            }
        }
        None
    }

    /// Percent-decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        for pair in self.query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if k == name {
                return urlencoding::decode(v).ok().map(|c| c.into_owned());
            }
        }
        None
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Cookie to set (or clear, with `max_age_seconds == 0`) alongside a
/// redirect.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieInstruction {
    pub name: String,
    pub value: String,
    pub max_age_seconds: i64,
    pub http_only: bool,
}

impl CookieInstruction {
    pub fn set(name: impl Into<String>, value: impl Into<String>, max_age_seconds: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age_seconds,
            http_only: true,
        }
    }

    pub fn clear(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            max_age_seconds: 0,
            http_only: true,
        }
    }
}

/// Outcome of starting a redirect-based flow.
#[derive(Debug, Clone)]
pub struct Redirect {
    pub url: String,
    pub cookies: Vec<CookieInstruction>,
}

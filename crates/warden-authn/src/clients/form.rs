//! Login form client
//!
//! Parses the JSON login body and delegates to the password composite.
//! Reached through explicit `login`/`authenticate_with` calls rather than
//! the probe loop.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use warden_core::{AuthnError, Identity, Request, Result};

use super::password::PasswordClient;
use super::{client_name, AuthnClient};

#[derive(Debug, Deserialize)]
struct LoginForm {
    user: String,
    password: String,
}

pub struct FormClient {
    password: Arc<PasswordClient>,
}

impl FormClient {
    pub fn new(password: Arc<PasswordClient>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthnClient for FormClient {
    fn name(&self) -> &str {
        client_name::FORM
    }

    fn test(&self, req: &Request) -> bool {
        req.method == http::Method::POST && req.path.ends_with("/login") && !req.body.is_empty()
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, req: &Request) -> Result<Identity> {
        let form: LoginForm = serde_json::from_slice(&req.body)
            .map_err(|_| AuthnError::bad_request("bad login data"))?;
        if form.user.is_empty() {
            return Err(AuthnError::bad_request("missing username"));
        }
        self.password
            .authenticate_password(req, &form.user, &form.password)
            .await
    }

    fn priority(&self) -> u32 {
        // Only ever invoked by name; parked behind everything else.
        u32::MAX
    }
}

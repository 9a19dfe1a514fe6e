//! Authentication dispatcher
//!
//! Holds the registered clients sorted by priority and the ordered sync
//! pipeline. A request is resolved by exactly one client: the first whose
//! probe matches. A failed `authenticate` is terminal, there is no
//! fall-through to the next client.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use warden_core::{
    meta, AuthnError, CreateTokenCommand, Identity, IdentityType, NewExternalSession, Redirect,
    Request, Result, SessionTokenService,
};

use crate::clients::{AuthnClient, RedirectClient};
use crate::sync::SyncHook;

pub struct Authenticator {
    /// Sorted by `(priority, registration order)` ascending.
    clients: Vec<Arc<dyn AuthnClient>>,
    clients_by_name: HashMap<String, Arc<dyn AuthnClient>>,
    redirect_clients: HashMap<String, Arc<dyn RedirectClient>>,
    /// Sorted by pipeline position; see [`crate::sync::hook_order`].
    hooks: Vec<(u32, Arc<dyn SyncHook>)>,
    session_tokens: Arc<dyn SessionTokenService>,
}

impl Authenticator {
    pub fn new(session_tokens: Arc<dyn SessionTokenService>) -> Self {
        Self {
            clients: Vec::new(),
            clients_by_name: HashMap::new(),
            redirect_clients: HashMap::new(),
            hooks: Vec::new(),
            session_tokens,
        }
    }

    pub fn register_client(&mut self, client: Arc<dyn AuthnClient>) {
        self.clients_by_name
            .insert(client.name().to_string(), Arc::clone(&client));
        self.clients.push(client);
        // Stable sort keeps registration order within a priority.
        self.clients.sort_by_key(|c| c.priority());
    }

    pub fn register_redirect_client<C>(&mut self, client: Arc<C>)
    where
        C: RedirectClient + 'static,
    {
        self.redirect_clients.insert(
            client.name().to_string(),
            Arc::clone(&client) as Arc<dyn RedirectClient>,
        );
        self.register_client(client as Arc<dyn AuthnClient>);
    }

    pub fn register_post_auth_hook(&mut self, position: u32, hook: Arc<dyn SyncHook>) {
        self.hooks.push((position, hook));
        self.hooks.sort_by_key(|(position, _)| *position);
    }

    /// Registered client names in dispatch order.
    pub fn client_names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    /// Hook names in pipeline order, for inspection in tests and startup
    /// logs.
    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|(_, h)| h.name()).collect()
    }

    /// Resolves the request through the first client whose probe matches,
    /// then runs the sync pipeline over the resulting identity.
    #[instrument(skip_all, fields(path = %req.path))]
    pub async fn authenticate(&self, req: &mut Request) -> Result<Identity> {
        for client in &self.clients {
            if !client.test(req) {
                continue;
            }
            debug!(client = client.name(), "client probe matched");
            return self.authenticate_via(client, req).await;
        }
        Err(AuthnError::ClientNotFound)
    }

    /// Resolves the request through one named client, skipping the probe.
    /// Used for explicit flows such as form login and OAuth callbacks.
    #[instrument(skip(self, req))]
    pub async fn authenticate_with(&self, client_name: &str, req: &mut Request) -> Result<Identity> {
        let client = self
            .clients_by_name
            .get(client_name)
            .ok_or(AuthnError::ClientNotFound)?;
        self.authenticate_via(&Arc::clone(client), req).await
    }

    /// Authenticates through a named client and mints a first-party session
    /// token for the resolved user. Only identities backed by a user record
    /// can log in.
    #[instrument(skip(self, req))]
    pub async fn login(&self, client_name: &str, req: &mut Request) -> Result<Identity> {
        let mut identity = self.authenticate_with(client_name, req).await?;

        if identity.id_type() != IdentityType::User {
            return Err(AuthnError::unexpected_identity_type(
                identity.id_type().to_string(),
            ));
        }
        let user_id = identity
            .user_id()
            .ok_or_else(|| AuthnError::internal("authenticated user has no record id"))?;

        // Track the provider session alongside the first-party token when
        // the client produced one.
        let external_session = identity.oauth_token.as_ref().map(|t| NewExternalSession {
            access_token: t.access_token.clone(),
            refresh_token: t.refresh_token.clone(),
            id_token: t.id_token.clone(),
            expires_at: t.expiry,
        });

        let token = self
            .session_tokens
            .create_token(&CreateTokenCommand {
                user_id,
                client_ip: req.client_ip.clone(),
                user_agent: req.user_agent.clone(),
                external_session,
            })
            .await?;

        info!(user = %identity, client = client_name, "successful login");
        identity.session_token = Some(token);
        Ok(identity)
    }

    /// Starts a redirect-based flow with the named client.
    pub async fn redirect_url(&self, client_name: &str, req: &Request) -> Result<Redirect> {
        let client = self
            .redirect_clients
            .get(client_name)
            .ok_or(AuthnError::ClientNotFound)?;
        client.redirect_url(req).await
    }

    async fn authenticate_via(
        &self,
        client: &Arc<dyn AuthnClient>,
        req: &mut Request,
    ) -> Result<Identity> {
        let mut identity = client.authenticate(req).await?;
        req.set_meta(meta::AUTH_MODULE, client.name());

        for (_, hook) in &self.hooks {
            if let Err(e) = hook.run(&mut identity, req).await {
                warn!(hook = hook.name(), identity = %identity, error = %e, "post-auth hook failed");
                return Err(e);
            }
        }

        Ok(identity)
    }
}

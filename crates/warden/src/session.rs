// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide session facade.
//!
//! Builds one [`SessionStore`] and hands the same instance to the refresh
//! coordinator, the hydration controller, and every [`AuthedClient`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::config::{Config, TokenPolicy};
use crate::expiry;
use crate::hydrate::{HydrationController, HydrationPhase};
use crate::identity::{IdentityClient, TokenPair};
use crate::pipeline::AuthedClient;
use crate::refresh::RefreshCoordinator;
use crate::state::{LogoutReason, SessionEvent, SessionState, Signals};
use crate::store::{FileStorage, SessionStore, Storage, UserProfile};

/// Timeout for API requests sent through [`Warden::client`].
const API_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Warden {
    store: Arc<SessionStore>,
    signals: Arc<Signals>,
    identity: IdentityClient,
    coordinator: RefreshCoordinator,
    hydration: HydrationController,
    client: AuthedClient,
}

impl Warden {
    pub fn new(medium: Arc<dyn Storage>, base_url: impl Into<String>, policy: TokenPolicy) -> Self {
        let identity = IdentityClient::new(base_url);
        let http = Client::builder().timeout(API_TIMEOUT).build().unwrap_or_default();
        Self::with_parts(medium, identity, http, policy)
    }

    /// Build from explicit clients, e.g. to share a connection pool.
    pub fn with_parts(
        medium: Arc<dyn Storage>,
        identity: IdentityClient,
        http: Client,
        policy: TokenPolicy,
    ) -> Self {
        let store = Arc::new(SessionStore::new(medium));
        let signals = Arc::new(Signals::new());
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            identity.clone(),
            Arc::clone(&signals),
            policy.refresh_timeout,
        );
        let hydration = HydrationController::new(
            Arc::clone(&store),
            coordinator.clone(),
            identity.clone(),
            Arc::clone(&signals),
            policy,
        );
        let client = AuthedClient::new(
            http,
            Arc::clone(&store),
            coordinator.clone(),
            policy.preflight_buffer,
        );
        Self { store, signals, identity, coordinator, hydration, client }
    }

    /// File-backed session in the configured state directory.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let dir = config.state_dir();
        std::fs::create_dir_all(&dir)?;
        let medium = FileStorage::new(dir);
        Ok(Self::new(Arc::new(medium), config.base_url.clone(), config.policy()))
    }

    pub async fn hydrate(&self) {
        self.hydration.hydrate().await;
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydration.is_hydrated()
    }

    pub fn hydration_phase(&self) -> HydrationPhase {
        self.hydration.phase()
    }

    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.hydration.on_ready(callback);
    }

    pub async fn wait_ready(&self) {
        self.hydration.wait_ready().await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.user()
    }

    pub fn state(&self) -> SessionState {
        self.signals.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.signals.watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.signals.subscribe()
    }

    /// Refresh now, joining a refresh already in flight.
    pub async fn refresh(&self) -> Option<String> {
        self.coordinator.refresh().await
    }

    /// Establish a session from a token pair obtained by an external login flow.
    ///
    /// The access token must carry a decodable `exp`; anything else is
    /// rejected and the current session is left as it was.
    pub fn login(&self, tokens: TokenPair, user: Option<UserProfile>) -> anyhow::Result<()> {
        let Some(expires_at) = expiry::unverified_expiry(&tokens.access) else {
            warn!("rejecting login: access token has no decodable expiry");
            anyhow::bail!("access token is not a JWT with an exp claim");
        };

        // A new session, so anything still in flight for the old one is void.
        self.store.clear();
        self.store.store_tokens(&tokens.access, tokens.refresh.as_deref());
        if let Some(ref user) = user {
            self.store.store_user(user);
        }
        self.signals.transition(SessionState::Authenticated);
        self.signals.emit(SessionEvent::LoggedIn);
        info!(
            has_profile = user.is_some(),
            rotating = tokens.refresh.is_some(),
            expires_at,
            "logged in"
        );
        Ok(())
    }

    /// End the session locally, then invalidate it on the server (best effort).
    pub async fn logout(&self) {
        // Let a refresh already on the wire settle so the server call can
        // revoke whatever it rotated to.
        if let Some(flight) = self.coordinator.in_flight() {
            flight.await;
        }

        // Clearing first moves the store to a new generation: a refresh
        // started from here on finds no token, and one that read the old
        // session is discarded when it settles.
        let session = self.store.snapshot();
        self.store.clear();
        self.signals.logged_out(LogoutReason::UserRequested);

        if session.access_token.is_some() || session.refresh_token.is_some() {
            if let Err(e) = self
                .identity
                .logout(session.access_token.as_deref(), session.refresh_token.as_deref())
                .await
            {
                warn!(err = %e, "server logout failed, local session already cleared");
            }
        }
        info!("logged out");
    }

    /// Client whose requests carry the session's bearer token.
    pub fn client(&self) -> &AuthedClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot startup hydration of the persisted session.
//!
//! Nothing should treat the session as authoritative before the phase reaches
//! [`HydrationPhase::Ready`]. Hydration never fails: refresh and profile
//! errors are logged and it completes with whatever session remains.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use crate::config::TokenPolicy;
use crate::expiry;
use crate::identity::IdentityClient;
use crate::refresh::RefreshCoordinator;
use crate::state::{SessionEvent, SessionState, Signals};
use crate::store::{Session, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationPhase {
    NotStarted,
    Hydrating,
    Ready,
}

type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

pub struct HydrationController {
    store: Arc<SessionStore>,
    coordinator: RefreshCoordinator,
    identity: IdentityClient,
    signals: Arc<Signals>,
    policy: TokenPolicy,
    once: OnceCell<()>,
    phase_tx: watch::Sender<HydrationPhase>,
    /// Callbacks waiting for `Ready`. The phase flips to `Ready` while this
    /// lock is held, so a registration never misses the drain.
    callbacks: Mutex<Vec<ReadyCallback>>,
}

impl HydrationController {
    pub fn new(
        store: Arc<SessionStore>,
        coordinator: RefreshCoordinator,
        identity: IdentityClient,
        signals: Arc<Signals>,
        policy: TokenPolicy,
    ) -> Self {
        let (phase_tx, _) = watch::channel(HydrationPhase::NotStarted);
        Self {
            store,
            coordinator,
            identity,
            signals,
            policy,
            once: OnceCell::new(),
            phase_tx,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Run hydration once. Concurrent callers share the same run; calls after
    /// it finished return immediately.
    pub async fn hydrate(&self) {
        self.once.get_or_init(|| self.run()).await;
    }

    pub fn phase(&self) -> HydrationPhase {
        *self.phase_tx.borrow()
    }

    pub fn is_hydrated(&self) -> bool {
        self.phase() == HydrationPhase::Ready
    }

    /// Run `callback` once hydration is ready; immediately if it already is.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut pending = self.callbacks.lock();
            if *self.phase_tx.borrow() != HydrationPhase::Ready {
                pending.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Wait until hydration is ready. Does not start it.
    pub async fn wait_ready(&self) {
        let mut rx = self.phase_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|phase| *phase == HydrationPhase::Ready).await;
    }

    async fn run(&self) {
        self.phase_tx.send_replace(HydrationPhase::Hydrating);
        self.signals.transition(SessionState::Hydrating);

        let session = self.store.load();
        debug!(
            has_access = session.access_token.is_some(),
            has_refresh = session.refresh_token.is_some(),
            "loaded persisted session"
        );
        self.reconcile(&session).await;

        self.store.mark_hydrated();
        let authenticated = self.store.is_authenticated();
        self.signals.transition(if authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        });

        let ready = {
            let mut pending = self.callbacks.lock();
            self.phase_tx.send_replace(HydrationPhase::Ready);
            std::mem::take(&mut *pending)
        };
        for callback in ready {
            callback();
        }
        self.signals.emit(SessionEvent::Ready { authenticated });
        info!(authenticated, "session hydrated");
    }

    /// Bring the loaded session up to date: refresh a token that is about to
    /// expire and refetch the cached profile.
    async fn reconcile(&self, session: &Session) {
        let Some(stored) = session.access_token.as_deref() else {
            return;
        };

        let mut access = stored.to_owned();
        if expiry::is_expiring_soon(Some(stored), self.policy.hydration_buffer) {
            if session.refresh_token.is_some() {
                match self.coordinator.refresh().await {
                    Some(token) => access = token,
                    None => {
                        warn!("hydration refresh failed, continuing unauthenticated");
                        return;
                    }
                }
            } else if expiry::remaining(stored).is_none() {
                // Expired or undecodable, and nothing to renew it with.
                warn!("stored access token is unusable and there is no refresh token");
                self.store.clear();
                return;
            }
        }

        if !self.policy.refetch_profile {
            return;
        }
        match self.identity.me(&access).await {
            Ok(user) => self.store.store_user(&user),
            Err(e) => warn!(err = %e, "failed to refetch user profile"),
        }
    }
}

#[cfg(test)]
#[path = "hydrate_tests.rs"]
mod tests;

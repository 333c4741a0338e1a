// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh.
//!
//! At most one refresh call is outstanding at any time. The first caller
//! spawns the refresh and parks a shared handle in the in-flight slot; every
//! caller that arrives before it settles awaits that same handle. The
//! spawned task empties the slot when it settles, so the next expiry starts
//! a fresh refresh.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::RefreshError;
use crate::expiry;
use crate::identity::IdentityClient;
use crate::state::{LogoutReason, SessionEvent, SessionState, Signals};
use crate::store::SessionStore;

/// Shared handle to a refresh in progress. Resolves to the new access
/// token, or `None` if the session could not be refreshed.
pub type RefreshFlight = Shared<BoxFuture<'static, Option<String>>>;

/// Coordinates refreshes across all request pipelines. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<SessionStore>,
    identity: IdentityClient,
    signals: Arc<Signals>,
    timeout: Duration,
    in_flight: Mutex<Option<RefreshFlight>>,
}

/// Empties the in-flight slot when the refresh task ends, even by panic.
struct SettleGuard(Arc<Inner>);

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.0.in_flight.lock().take();
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        identity: IdentityClient,
        signals: Arc<Signals>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                identity,
                signals,
                timeout,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Refresh the access token, joining a refresh already in flight.
    pub async fn refresh(&self) -> Option<String> {
        let flight = {
            let mut slot = self.inner.in_flight.lock();
            self.join_or_start(&mut slot)
        };
        flight.await
    }

    /// Return a token that is not expiring within `buffer`, refreshing only
    /// if needed. The expiry check happens under the slot lock, so a caller
    /// arriving just after a refresh settled reuses its token.
    pub async fn ensure_fresh(&self, buffer: Duration) -> Option<String> {
        let flight = {
            let mut slot = self.inner.in_flight.lock();
            if slot.is_none() {
                let current = self.inner.store.access_token();
                if current.is_some() && !expiry::is_expiring_soon(current.as_deref(), buffer) {
                    return current;
                }
            }
            self.join_or_start(&mut slot)
        };
        flight.await
    }

    /// The refresh currently in flight, if any.
    pub fn in_flight(&self) -> Option<RefreshFlight> {
        self.inner.in_flight.lock().clone()
    }

    fn join_or_start(&self, slot: &mut Option<RefreshFlight>) -> RefreshFlight {
        if let Some(flight) = slot.as_ref() {
            debug!("joining in-flight refresh");
            return flight.clone();
        }

        // The task cannot clear the slot before we fill it: it needs the
        // lock our caller is holding.
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = SettleGuard(Arc::clone(&inner));
            inner.run().await
        });
        let flight = async move {
            match task.await {
                Ok(token) => token,
                Err(e) => {
                    warn!(err = %e, "refresh task aborted");
                    None
                }
            }
        }
        .boxed()
        .shared();
        *slot = Some(flight.clone());
        flight
    }
}

impl Inner {
    async fn run(&self) -> Option<String> {
        let Some((refresh_token, generation)) = self.store.refresh_grant() else {
            // Nothing to exchange. A lingering access token can no longer be
            // kept valid, so the session ends here.
            if self.store.access_token().is_some() {
                warn!("no refresh token available, clearing session");
                self.store.clear();
                self.signals.logged_out(LogoutReason::RefreshFailed);
            }
            return None;
        };

        self.signals.transition(SessionState::Refreshing);
        let result = match tokio::time::timeout(self.timeout, self.identity.refresh(&refresh_token))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Transient(format!("timed out after {:?}", self.timeout))),
        };

        match result {
            Ok(pair) => {
                if !self.store.store_tokens_if(generation, &pair.access, pair.refresh.as_deref()) {
                    info!(generation, "session ended during refresh, discarding new tokens");
                    self.settle_superseded();
                    return None;
                }
                self.signals.transition(SessionState::Authenticated);
                let expires_at = expiry::unverified_expiry(&pair.access);
                self.signals.emit(SessionEvent::Refreshed {
                    rotated: pair.refresh.is_some(),
                    expires_at,
                });
                info!(rotated = pair.refresh.is_some(), ?expires_at, "access token refreshed");
                Some(pair.access)
            }
            Err(e) => {
                if !self.store.clear_if(generation) {
                    debug!(err = %e, "refresh failed after the session ended");
                    self.settle_superseded();
                    return None;
                }
                warn!(err = %e, "token refresh failed, session cleared");
                if matches!(e, RefreshError::Revoked(_)) {
                    self.signals.transition(SessionState::Expired);
                }
                self.signals.logged_out(LogoutReason::RefreshFailed);
                None
            }
        }
    }

    /// Leave `Refreshing` for whatever the session became while the refresh
    /// was outstanding.
    fn settle_superseded(&self) {
        if self.signals.state() == SessionState::Refreshing {
            let state = if self.store.is_authenticated() {
                SessionState::Authenticated
            } else {
                SessionState::Unauthenticated
            };
            self.signals.transition(state);
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;

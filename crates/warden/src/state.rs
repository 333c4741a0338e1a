// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine and the event channel the rest of the app listens on.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Logical session states driven by hydration, refresh, login and logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Hydrating,
    Authenticated,
    Refreshing,
    /// The refresh token itself was rejected; a clear follows immediately.
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Hydrating => "hydrating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    UserRequested,
    RefreshFailed,
}

/// Events broadcast to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A token pair was established by an external login flow.
    LoggedIn,
    /// A refresh succeeded. `expires_at` is the new token's `exp`, if decodable.
    Refreshed { rotated: bool, expires_at: Option<u64> },
    /// The session was cleared. Typically the UI redirects to login.
    LoggedOut { reason: LogoutReason },
    /// Hydration completed.
    Ready { authenticated: bool },
}

/// State watch + event broadcast shared by every component.
pub struct Signals {
    state_tx: watch::Sender<SessionState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        let (event_tx, _) = broadcast::channel(64);
        Self { state_tx, event_tx }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn transition(&self, to: SessionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            info!(%from, %to, "session state changed");
        }
    }

    /// Emit an event. Having no subscribers is fine.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Transition to `Unauthenticated` and announce the logout.
    pub fn logged_out(&self, reason: LogoutReason) {
        self.transition(SessionState::Unauthenticated);
        self.emit(SessionEvent::LoggedOut { reason });
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session persistence: a key/value [`Storage`] medium plus the typed
//! [`SessionStore`] that owns the process-wide [`Session`].
//!
//! Persistence is a cache. Corrupt entries are deleted on read and write
//! failures are logged and swallowed; neither ever reaches the caller.

pub mod file;
pub mod memory;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Persisted key for the bearer access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Persisted key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Persisted key for the cached user profile.
pub const USER_KEY: &str = "user";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Key/value persistence medium holding raw (already JSON-encoded) strings.
///
/// Object-safe for use as `Arc<dyn Storage>`.
pub trait Storage: Send + Sync + 'static {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Cached user profile. Display data only, never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any other fields the identity provider returns.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// In-memory view of the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
    /// Always equal to `access_token.is_some()`.
    pub is_authenticated: bool,
    /// Set once hydration has completed; survives `clear()`.
    pub is_hydrated: bool,
}

impl Session {
    fn set_access_token(&mut self, token: Option<String>) {
        self.is_authenticated = token.is_some();
        self.access_token = token;
    }

    fn wipe(&mut self) {
        self.set_access_token(None);
        self.refresh_token = None;
        self.user = None;
    }
}

/// Typed JSON store over a [`Storage`] medium, holding the process-wide
/// [`Session`] snapshot.
///
/// `get`/`set`/`remove` operate on the medium only. The in-memory session
/// changes through [`load`](Self::load), the token/user setters, and
/// [`clear`](Self::clear).
///
/// Every `clear` starts a new generation. Work that read the session before
/// a clear (a refresh in flight) writes back through
/// [`store_tokens_if`](Self::store_tokens_if) and is dropped once the
/// generation has moved on.
pub struct SessionStore {
    medium: Arc<dyn Storage>,
    session: RwLock<Session>,
    /// Only changes under the `session` write lock.
    generation: AtomicU64,
}

impl SessionStore {
    pub fn new(medium: Arc<dyn Storage>) -> Self {
        Self { medium, session: RwLock::new(Session::default()), generation: AtomicU64::new(0) }
    }

    /// Store backed by a fresh [`MemoryStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Read and JSON-decode `key`. A value that fails to decode is deleted
    /// and reported as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.medium.read(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, err = %e, "failed to read session key");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, err = %e, "corrupt session entry, removing");
                if let Err(e) = self.medium.delete(key) {
                    warn!(key, err = %e, "failed to remove corrupt session entry");
                }
                None
            }
        }
    }

    /// JSON-encode and write `value`. Failures are logged and swallowed.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                warn!(key, err = %e, "failed to encode session value");
                return;
            }
        };
        if let Err(e) = self.medium.write(key, &json) {
            warn!(key, err = %e, "failed to persist session value");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.medium.delete(key) {
            warn!(key, err = %e, "failed to remove session key");
        }
    }

    /// Remove access token, refresh token, and user profile, both persisted
    /// and in memory. Idempotent.
    pub fn clear(&self) {
        let mut session = self.session.write();
        self.wipe_locked(&mut session);
    }

    /// Wipe memory and medium while the caller holds the write lock, so a
    /// conditional write cannot land between the two.
    fn wipe_locked(&self, session: &mut Session) {
        session.wipe();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        for key in SESSION_KEYS {
            self.remove(key);
        }
        debug!(generation, "session cleared");
    }

    /// Current clear generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The refresh token together with the generation it belongs to.
    pub fn refresh_grant(&self) -> Option<(String, u64)> {
        let session = self.session.read();
        let token = session.refresh_token.clone()?;
        Some((token, self.generation.load(Ordering::SeqCst)))
    }

    /// Replace the in-memory session with what the medium holds.
    pub fn load(&self) -> Session {
        let access = self.get::<String>(ACCESS_TOKEN_KEY);
        let refresh = self.get::<String>(REFRESH_TOKEN_KEY);
        let user = self.get::<UserProfile>(USER_KEY);

        let mut session = self.session.write();
        session.set_access_token(access);
        session.refresh_token = refresh;
        session.user = user;
        session.clone()
    }

    /// Write a new access token, and the refresh token when one is given
    /// (a refresh response without rotation keeps the old one).
    pub fn store_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        let mut session = self.session.write();
        self.write_tokens_locked(&mut session, access_token, refresh_token);
    }

    /// [`store_tokens`](Self::store_tokens), unless the session was cleared
    /// since `generation`. Returns whether the tokens were stored.
    pub fn store_tokens_if(
        &self,
        generation: u64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> bool {
        let mut session = self.session.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.write_tokens_locked(&mut session, access_token, refresh_token);
        true
    }

    fn write_tokens_locked(
        &self,
        session: &mut Session,
        access_token: &str,
        refresh_token: Option<&str>,
    ) {
        session.set_access_token(Some(access_token.to_owned()));
        self.set(ACCESS_TOKEN_KEY, access_token);
        if let Some(rt) = refresh_token {
            session.refresh_token = Some(rt.to_owned());
            self.set(REFRESH_TOKEN_KEY, rt);
        }
    }

    /// [`clear`](Self::clear), unless the session was already cleared since
    /// `generation`. Returns whether this call cleared it.
    pub fn clear_if(&self, generation: u64) -> bool {
        let mut session = self.session.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.wipe_locked(&mut session);
        true
    }

    pub fn store_user(&self, user: &UserProfile) {
        self.session.write().user = Some(user.clone());
        self.set(USER_KEY, user);
    }

    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session.read().refresh_token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.session.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_authenticated
    }

    pub fn is_hydrated(&self) -> bool {
        self.session.read().is_hydrated
    }

    pub(crate) fn mark_hydrated(&self) {
        self.session.write().is_hydrated = true;
    }
}

/// Resolve the state directory for the file-backed store.
///
/// Checks `WARDEN_STATE_DIR`, then `$XDG_STATE_HOME/warden`,
/// then `$HOME/.local/state/warden`.
pub fn state_dir() -> PathBuf {
    state_dir_with(|name| std::env::var(name).ok())
}

fn state_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env("WARDEN_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = env("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("warden");
    }
    if let Some(home) = env("HOME") {
        return PathBuf::from(home).join(".local/state/warden");
    }
    PathBuf::from(".warden")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

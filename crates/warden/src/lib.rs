// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden: session token lifecycle coordinator for HTTP API clients.
//!
//! Keeps a short-lived access token valid across any number of concurrent
//! requests: a persisted [`store::SessionStore`], a one-shot
//! [`hydrate::HydrationController`], a single-flight
//! [`refresh::RefreshCoordinator`], and the [`pipeline::AuthedClient`]
//! interceptors that consume them. [`session::Warden`] wires them together.

pub mod config;
pub mod error;
pub mod expiry;
pub mod hydrate;
pub mod identity;
pub mod pipeline;
pub mod refresh;
pub mod session;
pub mod state;
pub mod store;


use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

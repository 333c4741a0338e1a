// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated HTTP pipeline.
//!
//! Every request goes through a pre-flight hook that attaches a fresh bearer
//! token and a post-flight hook that retries a 401 exactly once after a
//! refresh. The hooks never mutate the session directly; refreshes go
//! through the [`RefreshCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SendError;
use crate::refresh::RefreshCoordinator;
use crate::store::SessionStore;

/// One dispatch of a request. `retried` is the single-retry budget marker.
struct Attempt {
    id: Uuid,
    request: Request,
    retried: bool,
    /// Bearer token attached to `request`, if any.
    sent_with: Option<String>,
}

/// HTTP client that keeps requests authenticated.
#[derive(Clone)]
pub struct AuthedClient {
    http: Client,
    store: Arc<SessionStore>,
    coordinator: RefreshCoordinator,
    preflight_buffer: Duration,
}

impl AuthedClient {
    pub fn new(
        http: Client,
        store: Arc<SessionStore>,
        coordinator: RefreshCoordinator,
        preflight_buffer: Duration,
    ) -> Self {
        Self { http, store, coordinator, preflight_buffer }
    }

    /// Start building a request. Pass the result of `.build()` to [`send`](Self::send).
    pub fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub async fn get(&self, url: impl IntoUrl) -> Result<Response, SendError> {
        let request = self.http.get(url).build()?;
        self.send(request).await
    }

    /// Build and send.
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response, SendError> {
        self.send(builder.build()?).await
    }

    /// Send `request` through the pre-flight and post-flight hooks.
    ///
    /// Every response comes back as `Ok` except a 401 that survives the
    /// retry, or one for which no token could be obtained.
    pub async fn send(&self, request: Request) -> Result<Response, SendError> {
        let (request, sent_with) = self.preflight(request).await;
        let mut attempt = Attempt { id: Uuid::new_v4(), request, retried: false, sent_with };

        loop {
            let spare = if attempt.retried { None } else { attempt.request.try_clone() };
            let Attempt { id, request, retried, sent_with } = attempt;
            debug!(
                attempt = %id,
                retried,
                method = %request.method(),
                url = %request.url(),
                "sending request"
            );
            let response = self.http.execute(request).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if retried {
                warn!(attempt = %id, url = %response.url(), "still unauthorized after retry");
                return Err(SendError::Unauthorized { response, retried: true });
            }
            let Some(mut request) = spare else {
                debug!(attempt = %id, "request body cannot be replayed, not retrying");
                return Err(SendError::Unauthorized { response, retried: false });
            };
            let Some(token) = self.postflight(sent_with.as_deref()).await else {
                debug!(attempt = %id, "no token for retry");
                return Err(SendError::Unauthorized { response, retried: false });
            };

            set_bearer(&mut request, Some(&token));
            attempt = Attempt { id, request, retried: true, sent_with: Some(token) };
        }
    }

    /// Attach the freshest available token. Waits on a refresh that is
    /// already running, or starts one if the token is about to expire.
    async fn preflight(&self, mut request: Request) -> (Request, Option<String>) {
        let token = match self.coordinator.in_flight() {
            Some(flight) => flight.await,
            None if self.store.access_token().is_some() => {
                self.coordinator.ensure_fresh(self.preflight_buffer).await
            }
            None => None,
        };
        let attached = set_bearer(&mut request, token.as_deref());
        (request, token.filter(|_| attached))
    }

    /// Token for the retry of a request rejected with 401. When another
    /// request already replaced the token it was sent with, reuse that one.
    async fn postflight(&self, sent_with: Option<&str>) -> Option<String> {
        match self.store.access_token() {
            Some(current) if Some(current.as_str()) != sent_with => {
                debug!("token changed while request was in flight, reusing it");
                Some(current)
            }
            _ => self.coordinator.refresh().await,
        }
    }
}

/// Attach `token` as the bearer header. Without a usable token the request
/// is left as it is. Returns whether a token was attached.
fn set_bearer(request: &mut Request, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return false;
    };
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
            true
        }
        Err(e) => {
            warn!(err = %e, "access token is not a valid header value, sending without it");
            false
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the identity provider endpoints.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::RefreshError;
use crate::store::UserProfile;

const REFRESH_PATH: &str = "/auth/token/refresh";
const ME_PATH: &str = "/auth/me";
const LOGOUT_PATH: &str = "/auth/logout";

/// Access token plus an optional rotated refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Error body some providers return alongside a 4xx.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Identity provider client for one base URL.
#[derive(Clone)]
pub struct IdentityClient {
    base_url: String,
    client: Client,
}

impl IdentityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        crate::ensure_crypto();
        let client = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self::with_client(base_url, client)
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let resp = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh: refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transient(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body =
            resp.text().await.map_err(|e| RefreshError::Transient(format!("read body: {e}")))?;

        if !status.is_success() {
            let parsed = serde_json::from_str::<ErrorBody>(&body).ok();
            let invalid_grant =
                parsed.as_ref().and_then(|b| b.error.as_deref()) == Some("invalid_grant");
            let message = parsed
                .and_then(|b| b.detail.or(b.error))
                .unwrap_or_else(|| format!("HTTP {status}: {body}"));
            let rejected = matches!(
                status,
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            );
            if rejected || invalid_grant {
                return Err(RefreshError::Revoked(message));
            }
            return Err(RefreshError::Transient(message));
        }

        let pair: TokenPair = serde_json::from_str(&body)
            .map_err(|e| RefreshError::Transient(format!("parse response: {e}")))?;
        if pair.access.is_empty() {
            return Err(RefreshError::Transient("empty access token in response".into()));
        }
        Ok(pair)
    }

    /// Fetch the profile of the user owning `access_token`.
    pub async fn me(&self, access_token: &str) -> anyhow::Result<UserProfile> {
        let resp = self.client.get(self.url(ME_PATH)).bearer_auth(access_token).send().await?;
        let user = resp.error_for_status()?.json().await?;
        Ok(user)
    }

    /// Best-effort server-side invalidation.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut req = self.client.post(self.url(LOGOUT_PATH));
        if let Some(token) = access_token {
            req = req.bearer_auth(token);
        }
        if let Some(refresh) = refresh_token {
            req = req.json(&RefreshRequest { refresh });
        }
        req.send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;

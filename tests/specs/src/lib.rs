// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end tests.
//!
//! Serves a fake identity provider plus one protected endpoint, and runs
//! the real `warden` binary against it with an isolated state directory.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use tokio::net::TcpListener;

pub use warden::ensure_crypto;

/// Resolve the path to the compiled `warden` binary.
pub fn warden_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("warden")
}

/// An address nothing is listening on.
pub fn dead_addr() -> anyhow::Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

/// Unsigned JWT expiring `secs` from now.
pub fn jwt_expiring_in(secs: i64) -> String {
    let now = (warden::epoch_ms() / 1000) as i64;
    let exp = now.saturating_add(secs).max(0);
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({ "exp": exp, "jti": uuid::Uuid::new_v4().to_string() });
    format!("{header}.{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

struct ProviderState {
    /// Refresh token → response. Unknown refresh tokens get 401.
    grants: Mutex<Vec<(String, String, Option<String>)>>,
    refresh_delay: Duration,
    refresh_calls: AtomicU32,
    logout_calls: AtomicU32,
    accepted: Mutex<HashSet<String>>,
}

/// Fake identity provider with a protected `GET /api/data`.
///
/// A refresh token is single use: redeeming it yields the configured access
/// token (and rotated refresh token) and revokes it.
pub struct IdentityProvider {
    addr: SocketAddr,
    state: Arc<ProviderState>,
}

impl IdentityProvider {
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_refresh_delay(Duration::ZERO).await
    }

    pub async fn with_refresh_delay(refresh_delay: Duration) -> anyhow::Result<Self> {
        let state = Arc::new(ProviderState {
            grants: Mutex::new(vec![]),
            refresh_delay,
            refresh_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            accepted: Mutex::new(HashSet::new()),
        });
        let app = Router::new()
            .route("/auth/token/refresh", post(refresh))
            .route("/auth/me", get(me))
            .route("/auth/logout", post(logout))
            .route("/api/data", get(data))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Issue a session: `access` is accepted by the API.
    pub fn issue(&self, access: &str) {
        self.state.accepted.lock().insert(access.to_owned());
    }

    /// Let `refresh` be redeemed once for `access` (accepted by the API),
    /// rotating to `rotated` if given.
    pub fn grant(&self, refresh: &str, access: &str, rotated: Option<&str>) {
        self.issue(access);
        self.state.grants.lock().push((
            refresh.to_owned(),
            access.to_owned(),
            rotated.map(str::to_owned),
        ));
    }

    pub fn refresh_count(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.state.logout_calls.load(Ordering::SeqCst)
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

async fn refresh(State(s): State<Arc<ProviderState>>, body: String) -> (StatusCode, String) {
    s.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if !s.refresh_delay.is_zero() {
        tokio::time::sleep(s.refresh_delay).await;
    }
    let presented = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("refresh").and_then(|r| r.as_str()).map(str::to_owned));
    let Some(presented) = presented else {
        return (StatusCode::BAD_REQUEST, r#"{"detail":"refresh required"}"#.to_owned());
    };

    let mut grants = s.grants.lock();
    let Some(idx) = grants.iter().position(|(rt, _, _)| *rt == presented) else {
        return (StatusCode::UNAUTHORIZED, r#"{"detail":"Token is blacklisted"}"#.to_owned());
    };
    let (_, access, rotated) = grants.remove(idx);
    let body = match rotated {
        Some(rt) => serde_json::json!({ "access": access, "refresh": rt }),
        None => serde_json::json!({ "access": access }),
    };
    (StatusCode::OK, body.to_string())
}

async fn me(State(s): State<Arc<ProviderState>>, headers: HeaderMap) -> (StatusCode, String) {
    match bearer(&headers) {
        Some(t) if s.accepted.lock().contains(&t) => {
            let body = serde_json::json!({ "id": 7, "email": "grace@example.com", "name": "Grace" });
            (StatusCode::OK, body.to_string())
        }
        _ => (StatusCode::UNAUTHORIZED, "{}".to_owned()),
    }
}

async fn logout(State(s): State<Arc<ProviderState>>) -> StatusCode {
    s.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn data(State(s): State<Arc<ProviderState>>, headers: HeaderMap) -> (StatusCode, String) {
    match bearer(&headers) {
        Some(t) if s.accepted.lock().contains(&t) => (StatusCode::OK, "secret".to_owned()),
        _ => (StatusCode::UNAUTHORIZED, r#"{"detail":"token not valid"}"#.to_owned()),
    }
}

/// Result of one `warden` invocation.
#[derive(Debug)]
pub struct CliOutput {
    pub code: Option<i32>,
    pub json: serde_json::Value,
    pub stderr: String,
}

/// Runs the `warden` binary against one base URL and private state directory.
pub struct WardenCli {
    base_url: String,
    state_dir: tempfile::TempDir,
}

impl WardenCli {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self { base_url: base_url.into(), state_dir: tempfile::tempdir()? })
    }

    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    /// Persisted value of `key`, decoded.
    pub fn persisted(&self, key: &str) -> Option<serde_json::Value> {
        let raw = std::fs::read_to_string(self.state_dir().join(format!("{key}.json"))).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn run(&self, args: &[&str]) -> anyhow::Result<CliOutput> {
        self.run_against(&self.base_url, args).await
    }

    /// Run with a different base URL but the same state directory.
    pub async fn run_against(&self, base_url: &str, args: &[&str]) -> anyhow::Result<CliOutput> {
        let binary = warden_binary();
        anyhow::ensure!(binary.exists(), "warden binary not found at {}", binary.display());

        let output = tokio::process::Command::new(&binary)
            .args(["--base-url", base_url])
            .arg("--state-dir")
            .arg(self.state_dir())
            .args(["--log-format", "text", "--log-level", "warn"])
            .args(args)
            .env_remove("WARDEN_NO_PROFILE")
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let json = if stdout.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&stdout)?
        };
        Ok(CliOutput {
            code: output.status.code(),
            json,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

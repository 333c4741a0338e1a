// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library-level scenarios over the file-backed store.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use warden::config::TokenPolicy;
use warden::error::SendError;
use warden::identity::TokenPair;
use warden::session::Warden;
use warden::state::{LogoutReason, SessionEvent};
use warden::store::FileStorage;
use warden_specs::{jwt_expiring_in, IdentityProvider};

fn file_warden(idp: &IdentityProvider, dir: &std::path::Path) -> Warden {
    Warden::new(Arc::new(FileStorage::new(dir)), idp.base_url(), TokenPolicy::default())
}

fn pair(access: &str, refresh: Option<&str>) -> TokenPair {
    TokenPair { access: access.to_owned(), refresh: refresh.map(str::to_owned) }
}

#[tokio::test]
async fn parallel_requests_redeem_a_single_use_refresh_token_once() -> anyhow::Result<()> {
    let idp = IdentityProvider::with_refresh_delay(Duration::from_millis(50)).await?;
    let fresh = jwt_expiring_in(3600);
    idp.grant("single-use", &fresh, Some("next"));
    let tmp = tempfile::tempdir()?;
    let warden = file_warden(&idp, tmp.path());
    warden.login(pair(&jwt_expiring_in(2), Some("single-use")), None)?;

    let url = format!("{}/api/data", idp.base_url());
    let responses = join_all((0..5).map(|_| warden.client().get(&url))).await;

    for response in responses {
        assert_eq!(response?.text().await?, "secret");
    }
    assert_eq!(idp.refresh_count(), 1);
    assert!(warden.is_authenticated());
    assert_eq!(warden.store().refresh_token().as_deref(), Some("next"));
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_surfaces_401_and_logs_out() -> anyhow::Result<()> {
    let idp = IdentityProvider::start().await?;
    let tmp = tempfile::tempdir()?;
    let warden = file_warden(&idp, tmp.path());
    warden.login(pair(&jwt_expiring_in(2), None), None)?;
    let mut events = warden.subscribe();

    let result = warden.client().get(format!("{}/api/data", idp.base_url())).await;

    assert!(matches!(result, Err(SendError::Unauthorized { retried: false, .. })));
    assert_eq!(idp.refresh_count(), 0);
    assert!(!warden.is_authenticated());
    assert_eq!(
        events.recv().await?,
        SessionEvent::LoggedOut { reason: LogoutReason::RefreshFailed }
    );
    Ok(())
}

#[tokio::test]
async fn restart_hydrates_with_refreshed_token_before_ready() -> anyhow::Result<()> {
    let idp = IdentityProvider::start().await?;
    let stale = jwt_expiring_in(0);
    let fresh = jwt_expiring_in(3600);
    idp.issue(&stale);
    idp.grant("r1", &fresh, None);
    let tmp = tempfile::tempdir()?;
    file_warden(&idp, tmp.path()).login(pair(&stale, Some("r1")), None)?;

    let warden = Arc::new(file_warden(&idp, tmp.path()));
    let observed = Arc::new(parking_lot::Mutex::new(None));
    {
        let observed = Arc::clone(&observed);
        let reader = Arc::clone(&warden);
        warden.on_ready(move || *observed.lock() = reader.store().access_token());
    }
    warden.hydrate().await;

    assert_eq!(observed.lock().as_deref(), Some(fresh.as_str()));
    assert_eq!(idp.refresh_count(), 1);
    assert_eq!(warden.current_user().and_then(|u| u.name).as_deref(), Some("Grace"));
    Ok(())
}

#[tokio::test]
async fn corrupt_persisted_token_hydrates_logged_out() -> anyhow::Result<()> {
    let idp = IdentityProvider::start().await?;
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("access_token.json"), "{not json")?;

    let warden = file_warden(&idp, tmp.path());
    warden.hydrate().await;

    assert!(warden.is_hydrated());
    assert!(!warden.is_authenticated());
    assert!(!tmp.path().join("access_token.json").exists());
    Ok(())
}

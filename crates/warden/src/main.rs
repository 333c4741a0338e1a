// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use serde_json::json;
use tracing::{error, warn};

use warden::config::{Command, Config};
use warden::error::{ErrorCode, SendError};
use warden::expiry;
use warden::identity::TokenPair;
use warden::session::Warden;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(ErrorCode::InvalidConfig.exit_code());
    }

    init_tracing(&config);

    match run(config).await {
        Ok(None) => {}
        Ok(Some(code)) => std::process::exit(code.exit_code()),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(ErrorCode::Fatal.exit_code());
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries command output, so logs go to stderr.
    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

/// Run the subcommand. `Some(code)` is a non-success outcome to exit with.
async fn run(config: Config) -> anyhow::Result<Option<ErrorCode>> {
    let warden = Warden::from_config(&config)?;

    match config.command {
        Command::Status => {
            warden.hydrate().await;
            print_status(&warden)?;
            Ok(None)
        }
        Command::Login { access, refresh } => {
            let user = match warden.identity().me(&access).await {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(err = %e, "could not fetch profile for new session");
                    None
                }
            };
            if let Err(e) = warden.login(TokenPair { access, refresh }, user) {
                eprintln!("error: {e}");
                return Ok(Some(ErrorCode::InvalidConfig));
            }
            print_status(&warden)?;
            Ok(None)
        }
        Command::Refresh => {
            // Load without hydrating: hydration may itself refresh.
            warden.store().load();
            let token = warden.refresh().await;
            let expires_at = token.as_deref().and_then(expiry::unverified_expiry);
            print_json(&json!({
                "refreshed": token.is_some(),
                "expires_at": expires_at,
                "state": warden.state(),
            }))?;
            Ok(token.is_none().then_some(ErrorCode::Unauthenticated))
        }
        Command::Get { path } => {
            warden.hydrate().await;
            let url = format!("{}{path}", config.base_url.trim_end_matches('/'));
            match warden.client().get(url).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await?;
                    print_json(&json!({ "status": status, "body": body }))?;
                    Ok(None)
                }
                Err(SendError::Unauthorized { response, retried }) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    print_json(&json!({ "status": status, "body": body, "retried": retried }))?;
                    Ok(Some(ErrorCode::Unauthenticated))
                }
                Err(SendError::Transport(e)) => Err(e.into()),
            }
        }
        Command::Logout => {
            warden.store().load();
            warden.logout().await;
            print_status(&warden)?;
            Ok(None)
        }
    }
}

fn print_status(warden: &Warden) -> anyhow::Result<()> {
    let access = warden.store().access_token();
    let expires_at = access.as_deref().and_then(expiry::unverified_expiry);
    let expires_in = access.as_deref().and_then(expiry::remaining).map(|d| d.as_secs());
    print_json(&json!({
        "state": warden.state(),
        "authenticated": warden.is_authenticated(),
        "hydrated": warden.is_hydrated(),
        "user": warden.current_user(),
        "expires_at": expires_at,
        "expires_in_secs": expires_in,
        "has_refresh_token": warden.store().refresh_token().is_some(),
    }))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

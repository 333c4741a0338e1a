// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Default pre-flight buffer: refresh just before a request goes out.
pub const DEFAULT_PREFLIGHT_BUFFER_MS: u64 = 10_000;

/// Default hydration buffer: refresh proactively before first use.
pub const DEFAULT_HYDRATION_BUFFER_MS: u64 = 60_000;

/// Default timeout for a single refresh network call.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;

/// Timing knobs for the token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Window before expiry in which the request hook refreshes.
    pub preflight_buffer: Duration,
    /// Window before expiry in which hydration refreshes.
    pub hydration_buffer: Duration,
    /// Timeout for the refresh call; expiry counts as a refresh failure.
    pub refresh_timeout: Duration,
    /// Re-fetch the user profile during hydration.
    pub refetch_profile: bool,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            preflight_buffer: Duration::from_millis(DEFAULT_PREFLIGHT_BUFFER_MS),
            hydration_buffer: Duration::from_millis(DEFAULT_HYDRATION_BUFFER_MS),
            refresh_timeout: Duration::from_millis(DEFAULT_REFRESH_TIMEOUT_MS),
            refetch_profile: true,
        }
    }
}

/// Session token lifecycle tool for HTTP APIs.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
pub struct Config {
    /// Base URL of the API and identity provider.
    #[arg(long, env = "WARDEN_BASE_URL", default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// Directory for the persisted session. Defaults to the XDG state dir.
    #[arg(long, env = "WARDEN_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Pre-flight refresh buffer in milliseconds.
    #[arg(long, env = "WARDEN_PREFLIGHT_BUFFER_MS", default_value_t = DEFAULT_PREFLIGHT_BUFFER_MS)]
    pub preflight_buffer_ms: u64,

    /// Hydration refresh buffer in milliseconds.
    #[arg(long, env = "WARDEN_HYDRATION_BUFFER_MS", default_value_t = DEFAULT_HYDRATION_BUFFER_MS)]
    pub hydration_buffer_ms: u64,

    /// Refresh call timeout in milliseconds.
    #[arg(long, env = "WARDEN_REFRESH_TIMEOUT_MS", default_value_t = DEFAULT_REFRESH_TIMEOUT_MS)]
    pub refresh_timeout_ms: u64,

    /// Skip re-fetching the user profile during hydration.
    #[arg(long, env = "WARDEN_NO_PROFILE")]
    pub no_profile: bool,

    /// Log format (json or text).
    #[arg(long, env = "WARDEN_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Hydrate and print the session state as JSON.
    Status,
    /// Store a token pair obtained elsewhere.
    Login {
        #[arg(long)]
        access: String,
        #[arg(long)]
        refresh: Option<String>,
    },
    /// Force one refresh.
    Refresh,
    /// Issue an authenticated GET for a path relative to the base URL.
    Get { path: String },
    /// Invalidate the session on the server (best effort) and locally.
    Logout,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("--base-url must be an http(s) URL, got {:?}", self.base_url);
        }
        if self.refresh_timeout_ms == 0 {
            anyhow::bail!("--refresh-timeout-ms must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if let Command::Get { ref path } = self.command {
            if !path.starts_with('/') {
                anyhow::bail!("path must start with '/': {path}");
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> TokenPolicy {
        TokenPolicy {
            preflight_buffer: Duration::from_millis(self.preflight_buffer_ms),
            hydration_buffer: Duration::from_millis(self.hydration_buffer_ms),
            refresh_timeout: Duration::from_millis(self.refresh_timeout_ms),
            refetch_profile: !self.no_profile,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(crate::store::state_dir)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome classes reported by the CLI, each with its own exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Fatal,
    InvalidConfig,
    Unauthenticated,
}

impl ErrorCode {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Fatal => 1,
            Self::InvalidConfig => 2,
            Self::Unauthenticated => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a refresh call failed. Either way the session is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The identity provider rejected the refresh token (400/401/403 or
    /// `invalid_grant`).
    Revoked(String),
    /// Network error, timeout, unexpected status, or unreadable body.
    Transient(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revoked(msg) => write!(f, "revoked: {msg}"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Failure of a request sent through [`AuthedClient`](crate::pipeline::AuthedClient).
///
/// Every response other than a final 401 comes back as `Ok`.
#[derive(Debug)]
pub enum SendError {
    /// The server answered 401 and the retry budget is spent (`retried`) or
    /// no fresh token could be obtained.
    Unauthorized { response: reqwest::Response, retried: bool },
    /// The request never produced a response.
    Transport(reqwest::Error),
}

impl SendError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized { .. } => ErrorCode::Unauthenticated,
            Self::Transport(_) => ErrorCode::Fatal,
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized { response, retried: true } => {
                write!(f, "{} still unauthorized after retry", response.url())
            }
            Self::Unauthorized { response, retried: false } => {
                write!(f, "{} unauthorized, no token available", response.url())
            }
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Unauthorized { .. } => None,
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

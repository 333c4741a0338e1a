// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry heuristics for bearer tokens.
//!
//! Reads the `exp` claim from a JWT payload WITHOUT verifying the signature.
//! The result only decides when to refresh proactively; it must never be
//! used as an authorization decision (the server validates every request).
//! Anything that cannot be decoded counts as expired.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::epoch_ms;

/// Decode the `exp` claim (seconds since epoch) from an unverified JWT.
pub fn unverified_expiry(token: &str) -> Option<u64> {
    let mut segments = token.split('.');
    let (_header, payload) = (segments.next()?, segments.next()?);
    // A JWS compact token has exactly three segments.
    segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    exp.as_u64().or_else(|| {
        exp.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)
    })
}

/// Whether `token` expires within `buffer` of now. Missing or undecodable
/// tokens are treated as expired.
pub fn is_expiring_soon(token: Option<&str>, buffer: Duration) -> bool {
    is_expiring_soon_at(token, buffer, epoch_ms())
}

/// [`is_expiring_soon`] against an explicit clock (epoch millis).
pub fn is_expiring_soon_at(token: Option<&str>, buffer: Duration, now_ms: u64) -> bool {
    let Some(exp) = token.and_then(unverified_expiry) else {
        return true;
    };
    let buffer_ms = u64::try_from(buffer.as_millis()).unwrap_or(u64::MAX);
    now_ms.saturating_add(buffer_ms) >= exp.saturating_mul(1000)
}

/// Time left before `token` expires, if it is decodable and not yet expired.
pub fn remaining(token: &str) -> Option<Duration> {
    let exp_ms = unverified_expiry(token)?.saturating_mul(1000);
    let now = epoch_ms();
    (exp_ms > now).then(|| Duration::from_millis(exp_ms - now))
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;

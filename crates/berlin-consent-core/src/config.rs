// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Engine-level configuration.
//!
//! [`EngineConfig`] is built once at process start and handed by value to
//! every component constructor.  All fields have defaults so that
//! `EngineConfig::default()` is always a valid starting point.

use serde::{Deserialize, Serialize};

/// Top-level configuration for [`ConsentEngine`].
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::config::EngineConfig;
///
/// let config = EngineConfig {
///     multiple_recurring_consent_enabled: true,
///     ..EngineConfig::default()
/// };
/// assert_eq!(config.consent_inactivity_days, 90);
/// ```
///
/// [`ConsentEngine`]: crate::engine::ConsentEngine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When `false`, fully authorising a recurring accounts consent expires
    /// every other valid recurring consent of the same client and PSU.
    pub multiple_recurring_consent_enabled: bool,

    /// An accounts consent not updated for this many days is
    /// treated as expired on its next read.
    pub consent_inactivity_days: u32,

    pub idempotency: IdempotencyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            multiple_recurring_consent_enabled: false,
            consent_inactivity_days: 90,
            idempotency: IdempotencyConfig::default(),
        }
    }
}

/// Settings for the idempotency cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// When `false` the guard lets every request through unchecked.
    pub enabled: bool,

    /// Lifetime of a cache entry in seconds.  An entry is live while
    /// `now - created <= allowed_duration_secs`.
    pub allowed_duration_secs: u64,

    /// How long a duplicate request waits for the first request's response
    /// before giving up with `IdempotencyInFlight`.
    pub in_flight_wait_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_duration_secs: 3_600,
            in_flight_wait_ms: 5_000,
        }
    }
}

impl IdempotencyConfig {
    pub fn allowed_duration_ms(&self) -> u64 {
        self.allowed_duration_secs.saturating_mul(1_000)
    }
}

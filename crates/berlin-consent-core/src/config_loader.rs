// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Configuration loader for [`ConsentEngine`].
//!
//! Supports two load strategies:
//!
//! 1. **TOML file**: [`load_config`] reads and deserialises a TOML file into
//!    a [`ConsentConfig`] struct.
//! 2. **Environment variables**: [`load_config_from_env`] reads
//!    `BERLIN_CONSENT_`-prefixed environment variables.
//!
//! Both return a flat [`ConsentConfig`]; convert it with `.into()` to get the
//! [`EngineConfig`] the engine takes.
//!
//! # File format
//!
//! ```toml
//! allowed_duration                   = 3600   # idempotency TTL, seconds
//! multiple_recurring_consent_enabled = false
//! idempotency_enabled                = true
//! inactivity_days                    = 90
//! in_flight_wait_ms                  = 5000
//! ```
//!
//! [`ConsentEngine`]: crate::engine::ConsentEngine

#![cfg(feature = "config-loader")]

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{EngineConfig, IdempotencyConfig};

// ---------------------------------------------------------------------------
// ConsentConfig
// ---------------------------------------------------------------------------

/// Flat, serialisation-friendly form of [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// Idempotency cache TTL in seconds.
    pub allowed_duration: u64,
    pub multiple_recurring_consent_enabled: bool,
    pub idempotency_enabled: bool,
    /// Days without an update after which an accounts consent expires.
    pub inactivity_days: u32,
    /// How long a duplicate waits for an in-flight original.
    pub in_flight_wait_ms: u64,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        EngineConfig::default().into()
    }
}

impl ConsentConfig {
    /// # Errors
    ///
    /// [`ConfigError::InvalidRange`] when a duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_duration == 0 {
            return Err(ConfigError::InvalidRange {
                field: "allowed_duration".into(),
                value: "0".into(),
                reason: "must be at least one second".into(),
            });
        }
        if self.inactivity_days == 0 {
            return Err(ConfigError::InvalidRange {
                field: "inactivity_days".into(),
                value: "0".into(),
                reason: "must be at least one day".into(),
            });
        }
        Ok(())
    }
}

impl From<ConsentConfig> for EngineConfig {
    fn from(config: ConsentConfig) -> Self {
        EngineConfig {
            multiple_recurring_consent_enabled: config.multiple_recurring_consent_enabled,
            consent_inactivity_days: config.inactivity_days,
            idempotency: IdempotencyConfig {
                enabled: config.idempotency_enabled,
                allowed_duration_secs: config.allowed_duration,
                in_flight_wait_ms: config.in_flight_wait_ms,
            },
        }
    }
}

impl From<EngineConfig> for ConsentConfig {
    fn from(config: EngineConfig) -> Self {
        ConsentConfig {
            allowed_duration: config.idempotency.allowed_duration_secs,
            multiple_recurring_consent_enabled: config.multiple_recurring_consent_enabled,
            idempotency_enabled: config.idempotency.enabled,
            inactivity_days: config.consent_inactivity_days,
            in_flight_wait_ms: config.idempotency.in_flight_wait_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or parsing consent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("field {field:?}: cannot parse {value:?}: {reason}")]
    ParseField { field: String, value: String, reason: String },

    #[error("field {field:?}: value {value:?} out of range: {reason}")]
    InvalidRange { field: String, value: String, reason: String },
}

// ---------------------------------------------------------------------------
// TOML loader
// ---------------------------------------------------------------------------

/// Load a [`ConsentConfig`] from a TOML file.  Missing keys take defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, does not match the
/// schema, or holds out-of-range values.
///
/// # Example
///
/// ```rust,no_run
/// use berlin_consent_core::config::EngineConfig;
/// use berlin_consent_core::config_loader::load_config;
///
/// let config: EngineConfig = load_config("/etc/berlin-consent/engine.toml").unwrap().into();
/// println!("idempotency TTL: {}s", config.idempotency.allowed_duration_secs);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<ConsentConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content)
}

/// Parse TOML text into a validated [`ConsentConfig`].
pub fn parse_config(content: &str) -> Result<ConsentConfig, ConfigError> {
    let config: ConsentConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable loader
// ---------------------------------------------------------------------------

/// Load a [`ConsentConfig`] from `BERLIN_CONSENT_`-prefixed environment
/// variables.  Unset variables fall back to their defaults.
///
/// | Variable                                            | Type | Default |
/// |-----------------------------------------------------|------|---------|
/// | `BERLIN_CONSENT_ALLOWED_DURATION`                   | u64  | 3600    |
/// | `BERLIN_CONSENT_MULTIPLE_RECURRING_CONSENT_ENABLED` | bool | false   |
/// | `BERLIN_CONSENT_IDEMPOTENCY_ENABLED`                | bool | true    |
/// | `BERLIN_CONSENT_INACTIVITY_DAYS`                    | u32  | 90      |
/// | `BERLIN_CONSENT_IN_FLIGHT_WAIT_MS`                  | u64  | 5000    |
///
/// # Errors
///
/// [`ConfigError::ParseField`] for unparsable values and
/// [`ConfigError::InvalidRange`] for zero durations.
pub fn load_config_from_env() -> Result<ConsentConfig, ConfigError> {
    load_config_from_vars(|key| std::env::var(key).ok())
}

/// Same as [`load_config_from_env`] but reads variables through `lookup`.
///
/// ```rust
/// use berlin_consent_core::config_loader::load_config_from_vars;
///
/// let config = load_config_from_vars(|key| {
///     (key == "BERLIN_CONSENT_ALLOWED_DURATION").then(|| "60".to_owned())
/// })
/// .unwrap();
/// assert_eq!(config.allowed_duration, 60);
/// assert!(config.idempotency_enabled);
/// ```
pub fn load_config_from_vars<F>(lookup: F) -> Result<ConsentConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ConsentConfig::default();
    let config = ConsentConfig {
        allowed_duration: read_u64(&lookup, "BERLIN_CONSENT_ALLOWED_DURATION", defaults.allowed_duration)?,
        multiple_recurring_consent_enabled: read_bool(
            &lookup,
            "BERLIN_CONSENT_MULTIPLE_RECURRING_CONSENT_ENABLED",
            defaults.multiple_recurring_consent_enabled,
        )?,
        idempotency_enabled: read_bool(
            &lookup,
            "BERLIN_CONSENT_IDEMPOTENCY_ENABLED",
            defaults.idempotency_enabled,
        )?,
        inactivity_days: read_u32(&lookup, "BERLIN_CONSENT_INACTIVITY_DAYS", defaults.inactivity_days)?,
        in_flight_wait_ms: read_u64(&lookup, "BERLIN_CONSENT_IN_FLIGHT_WAIT_MS", defaults.in_flight_wait_ms)?,
    };
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => val.trim().parse::<u64>().map_err(|source| ConfigError::ParseField {
            field: key.to_owned(),
            value: val.clone(),
            reason: source.to_string(),
        }),
        None => Ok(default),
    }
}

fn read_u32<F>(lookup: &F, key: &str, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => val.trim().parse::<u32>().map_err(|source| ConfigError::ParseField {
            field: key.to_owned(),
            value: val.clone(),
            reason: source.to_string(),
        }),
        None => Ok(default),
    }
}

fn read_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true"  | "1" | "yes" | "on"  => Ok(true),
            "false" | "0" | "no"  | "off" => Ok(false),
            other => Err(ConfigError::ParseField {
                field: key.to_owned(),
                value: other.to_owned(),
                reason: "expected one of: true/false, 1/0, yes/no, on/off".into(),
            }),
        },
        None => Ok(default),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # berlin-consent-std
//!
//! Filesystem storage backends for `berlin-consent-core`.
//!
//! This crate provides [`FileConsentStore`], a JSON file-backed
//! implementation of the [`ConsentStore`] trait suitable for single-node
//! deployments, local tooling and tests that need state to survive a
//! restart.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use berlin_consent_core::{ConsentEngine, EngineConfig};
//! use berlin_consent_std::FileConsentStore;
//!
//! let store = FileConsentStore::open("/var/lib/berlin-consent/consents.json")
//!     .expect("failed to open consent store");
//!
//! let engine = ConsentEngine::new(EngineConfig::default(), store);
//! ```
//!
//! [`ConsentStore`]: berlin_consent_core::ConsentStore

pub mod storage;

pub use storage::file::FileConsentStore;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # berlin-consent-core
//!
//! Consent and multi-authorisation lifecycle engine for Berlin Group
//! (PSD2) open-banking APIs, with idempotent request deduplication.
//!
//! A consent (account access, funds confirmation or a payment) may need
//! Strong Customer Authentication from several PSUs.  Each PSU verdict is
//! recorded against its authorisation, the authorisations are aggregated and
//! the aggregate drives the consent through its status state machine.
//!
//! ## Architecture
//!
//! ```text
//! ConsentEngine<S: ConsentStore>
//!   ├── AuthorisationLifecycleManager<S>  record verdicts, aggregate, transition
//!   │     └── RecurringConsentSuperseder<S>  expire older recurring consents
//!   ├── ConsentExpiryEvaluator<S>         lazy expiry, one-off consumption
//!   └── IdempotencyCache                  replay / conflict / in-flight wait
//!
//! RequestKind::parse(method, path)        closed routing enum at the edge
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use berlin_consent_core::{
//!     engine::NewConsent,
//!     lifecycle::OutcomeRequest,
//!     permissions::AccountPermissions,
//!     types::{AuthorisationType, ConsentStatus, ConsentType, Status},
//!     ConsentEngine, EngineConfig, InMemoryConsentStore,
//! };
//!
//! let engine = ConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());
//!
//! let consent = engine
//!     .create_consent(NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({})))
//!     .unwrap();
//! let auth = engine
//!     .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
//!     .unwrap();
//!
//! let accounts = AccountPermissions::from_access(&["iban:DE89370400440532013000:EUR"], &[], &[]).unwrap();
//! let report = engine
//!     .record_outcome(&OutcomeRequest::approve(&consent.id, &auth.id, "psu-1").with_permissions(accounts))
//!     .unwrap();
//! assert_eq!(report.status, Status::Consent(ConsentStatus::Valid));
//! ```

pub mod aggregate;
pub mod async_engine;
pub mod clock;
pub mod config;
pub mod config_loader;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod idempotency;
pub mod lifecycle;
pub mod locks;
pub mod permissions;
pub mod routing;
pub mod state;
pub mod storage;
pub mod supersede;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export the most commonly used items at the crate root so consumers can
// write `use berlin_consent_core::ConsentEngine;` instead of the fully
// qualified path.
pub use aggregate::aggregate_status;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{EngineConfig, IdempotencyConfig};
pub use engine::ConsentEngine;
pub use error::{ConsentError, StoreError};
pub use idempotency::{Admission, CachedResponse, Execution, IdempotencyCache, IdempotencyKey};
pub use lifecycle::{OutcomeReport, OutcomeRequest};
pub use routing::{Method, RequestKind};
pub use storage::{ConsentFilter, ConsentStore, ConsentTables, InMemoryConsentStore};
pub use types::{
    AccountMapping, AccountReference, AggregateStatus, Authorisation, AuthorisationType, Consent,
    ConsentStatus, ConsentType, DetailedConsent, Outcome, Permission, RevokedBy, ScaStatus,
    Status, TransactionStatus,
};

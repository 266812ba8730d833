// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Async consent engine backed by Tokio.
//!
//! This module is only compiled when the `async` feature flag is enabled:
//!
//! ```toml
//! [dependencies]
//! berlin-consent-core = { version = "0.1", features = ["async"] }
//! ```
//!
//! # Design
//!
//! [`AsyncConsentEngine`] shares one [`ConsentEngine`] between tasks.  The
//! engine serialises work per consent with blocking locks and may park a
//! thread while an identical idempotent request is in flight, so every call
//! runs on Tokio's blocking pool via [`tokio::task::spawn_blocking`] instead
//! of on a runtime worker.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "async")]
//! # {
//! use berlin_consent_core::{
//!     async_engine::AsyncConsentEngine,
//!     engine::NewConsent,
//!     types::{AuthorisationType, ConsentType},
//!     EngineConfig, InMemoryConsentStore,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = AsyncConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());
//!
//!     let consent = engine
//!         .create_consent(NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({})))
//!         .await
//!         .unwrap();
//!     let auth = engine
//!         .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
//!         .await
//!         .unwrap();
//!     println!("started {}", auth.id);
//! }
//! # }
//! ```

#![cfg(feature = "async")]

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::{ConsentEngine, NewConsent};
use crate::error::ConsentError;
use crate::expiry::DataRetrieval;
use crate::idempotency::{CachedResponse, Execution};
use crate::lifecycle::{OutcomeReport, OutcomeRequest};
use crate::routing::RequestKind;
use crate::storage::ConsentStore;
use crate::types::{Authorisation, AuthorisationType, Consent, RevokedBy};

// ---------------------------------------------------------------------------
// AsyncConsentEngine
// ---------------------------------------------------------------------------

/// Async facade over a shared [`ConsentEngine`].
///
/// Cloning is cheap and every clone drives the same engine.
pub struct AsyncConsentEngine<S: ConsentStore> {
    inner: Arc<ConsentEngine<S>>,
}

impl<S: ConsentStore> Clone for AsyncConsentEngine<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: ConsentStore + 'static> AsyncConsentEngine<S> {
    /// Construct an [`AsyncConsentEngine`] over `store` using wall-clock time.
    pub fn new(config: EngineConfig, store: S) -> Self {
        Self::from_engine(ConsentEngine::new(config, store))
    }

    /// Wrap an already-built engine, e.g. one with an injected clock.
    pub fn from_engine(engine: ConsentEngine<S>) -> Self {
        Self { inner: Arc::new(engine) }
    }

    /// The wrapped synchronous engine.
    pub fn engine(&self) -> &ConsentEngine<S> {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> Result<T, ConsentError>
    where
        T: Send + 'static,
        F: FnOnce(&ConsentEngine<S>) -> Result<T, ConsentError> + Send + 'static,
    {
        let engine = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&engine))
            .await
            .map_err(|err| ConsentError::Internal(format!("blocking task failed: {err}")))?
    }

    // -----------------------------------------------------------------------
    // Consents
    // -----------------------------------------------------------------------

    pub async fn create_consent(&self, request: NewConsent) -> Result<Consent, ConsentError> {
        self.run(move |engine| engine.create_consent(request)).await
    }

    pub async fn read_consent(&self, consent_id: &str, client_id: &str) -> Result<Consent, ConsentError> {
        let (consent_id, client_id) = (consent_id.to_owned(), client_id.to_owned());
        self.run(move |engine| engine.read_consent(&consent_id, &client_id)).await
    }

    pub async fn revoke_consent(
        &self,
        consent_id: &str,
        client_id: &str,
        by: RevokedBy,
    ) -> Result<Consent, ConsentError> {
        let (consent_id, client_id) = (consent_id.to_owned(), client_id.to_owned());
        self.run(move |engine| engine.revoke_consent(&consent_id, &client_id, by)).await
    }

    pub async fn record_data_retrieval(
        &self,
        consent_id: &str,
        client_id: &str,
    ) -> Result<DataRetrieval, ConsentError> {
        let (consent_id, client_id) = (consent_id.to_owned(), client_id.to_owned());
        self.run(move |engine| engine.record_data_retrieval(&consent_id, &client_id)).await
    }

    // -----------------------------------------------------------------------
    // Authorisations
    // -----------------------------------------------------------------------

    pub async fn start_authorisation(
        &self,
        consent_id: &str,
        client_id: &str,
        auth_type: AuthorisationType,
    ) -> Result<Authorisation, ConsentError> {
        let (consent_id, client_id) = (consent_id.to_owned(), client_id.to_owned());
        self.run(move |engine| engine.start_authorisation(&consent_id, &client_id, auth_type))
            .await
    }

    pub async fn record_outcome(&self, request: OutcomeRequest) -> Result<OutcomeReport, ConsentError> {
        self.run(move |engine| engine.record_outcome(&request)).await
    }

    // -----------------------------------------------------------------------
    // Idempotency
    // -----------------------------------------------------------------------

    /// Async form of [`ConsentEngine::execute_idempotent`].
    ///
    /// The handler runs on the blocking pool alongside the cache lookup.
    pub async fn execute_idempotent<F>(
        &self,
        request: RequestKind,
        client_id: &str,
        header: Option<&str>,
        payload: Vec<u8>,
        handler: F,
    ) -> Result<Execution, ConsentError>
    where
        F: FnOnce(&ConsentEngine<S>) -> Result<CachedResponse, ConsentError> + Send + 'static,
    {
        let client_id = client_id.to_owned();
        let header = header.map(str::to_owned);
        self.run(move |engine| {
            engine.execute_idempotent(&request, &client_id, header.as_deref(), &payload, || {
                handler(engine)
            })
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::permissions::AccountPermissions;
    use crate::routing::Method;
    use crate::storage::InMemoryConsentStore;
    use crate::types::{ConsentStatus, ConsentType, Status};

    fn engine() -> AsyncConsentEngine<InMemoryConsentStore> {
        AsyncConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new())
    }

    #[tokio::test]
    async fn async_two_party_flow() {
        let engine = engine();
        let consent = engine
            .create_consent(NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({})))
            .await
            .unwrap();
        let a1 = engine
            .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
            .await
            .unwrap();
        let a2 = engine
            .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
            .await
            .unwrap();
        let accounts = AccountPermissions::from_access(&["iban:DE02:EUR"], &[], &[]).unwrap();

        let (r1, r2) = tokio::join!(
            engine.record_outcome(
                OutcomeRequest::approve(&consent.id, &a1.id, "psu-1").with_permissions(accounts.clone())
            ),
            engine.record_outcome(
                OutcomeRequest::approve(&consent.id, &a2.id, "psu-2").with_permissions(accounts)
            ),
        );
        r1.unwrap();
        r2.unwrap();

        let read = engine.read_consent(&consent.id, "tpp-1").await.unwrap();
        assert_eq!(read.status, Status::Consent(ConsentStatus::Valid));
    }

    #[tokio::test]
    async fn async_errors_propagate() {
        let engine = engine();
        let err = engine.read_consent("missing", "tpp-1").await.unwrap_err();
        assert!(matches!(err, ConsentError::NotFound { .. }));
        let err = engine.revoke_consent("missing", "tpp-1", RevokedBy::Tpp).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_retries_create_one_consent() {
        let engine = engine();
        let runs = Arc::new(AtomicUsize::new(0));
        let request = RequestKind::parse(Method::Post, "/consents").unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let runs = Arc::clone(&runs);
            let request = request.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .execute_idempotent(request, "tpp-1", Some("retry-1"), b"{}".to_vec(), move |inner| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        let consent = inner.create_consent(NewConsent::new(
                            "tpp-1",
                            ConsentType::Accounts,
                            serde_json::json!({}),
                        ))?;
                        Ok(CachedResponse::new(201, consent.id))
                    })
                    .await
            }));
        }

        let mut bodies = Vec::new();
        for task in tasks {
            bodies.push(task.await.unwrap().unwrap().into_response().body);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    }
}

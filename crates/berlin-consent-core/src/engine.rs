// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Consent engine, the top-level composition of all lifecycle components.
//!
//! [`ConsentEngine`] owns one shared store handle, the clock, the per-consent
//! lock table and every component built on them.  The components are public
//! fields so callers can reach their full API; the engine's own methods cover
//! the request flows that span more than one component.
//!
//! ## Request flow
//!
//! 1. **Routing**: the caller classifies the request with
//!    [`RequestKind::parse`].
//! 2. **Idempotency**: POST writes pass through
//!    [`ConsentEngine::execute_idempotent`], which replays, rejects or runs
//!    the handler.
//! 3. **Handler**: the handler calls one of the engine operations below.
//!
//! Every operation that rewrites a consent holds that consent's lock for the
//! whole read-decide-write sequence.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::clock::{SharedClock, SystemClock};
use crate::config::EngineConfig;
use crate::error::ConsentError;
use crate::expiry::{ConsentExpiryEvaluator, DataRetrieval};
use crate::idempotency::{Admission, CachedResponse, Execution, IdempotencyCache, IdempotencyKey};
use crate::lifecycle::{AuthorisationLifecycleManager, OutcomeReport, OutcomeRequest};
use crate::locks::KeyedLocks;
use crate::routing::RequestKind;
use crate::storage::ConsentStore;
use crate::types::{
    Authorisation, AuthorisationType, Consent, ConsentType, RevokedBy, ScaStatus, Status,
};

// ---------------------------------------------------------------------------
// NewConsent
// ---------------------------------------------------------------------------

/// Everything a TPP submits when initiating a consent or payment.
///
/// The engine assigns the id, the initial status and the timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConsent {
    pub client_id: String,
    pub consent_type: ConsentType,
    pub valid_until_ms: Option<u64>,
    pub recurring_indicator: bool,
    pub receipt: serde_json::Value,
    pub attributes: HashMap<String, String>,
}

impl NewConsent {
    pub fn new(client_id: &str, consent_type: ConsentType, receipt: serde_json::Value) -> Self {
        Self {
            client_id: client_id.to_owned(),
            consent_type,
            valid_until_ms: None,
            recurring_indicator: false,
            receipt,
            attributes: HashMap::new(),
        }
    }

    pub fn valid_until(mut self, valid_until_ms: u64) -> Self {
        self.valid_until_ms = Some(valid_until_ms);
        self
    }

    pub fn recurring(mut self) -> Self {
        self.recurring_indicator = true;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_owned(), value.to_owned());
        self
    }
}

// ---------------------------------------------------------------------------
// ConsentEngine
// ---------------------------------------------------------------------------

/// Composes the consent lifecycle components over one shared store.
///
/// # Construction
///
/// ```rust
/// use berlin_consent_core::{ConsentEngine, EngineConfig, InMemoryConsentStore};
///
/// let engine = ConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());
/// assert!(engine.idempotency.is_enabled());
/// ```
///
/// # Two-party authorisation
///
/// ```rust
/// use berlin_consent_core::{ConsentEngine, EngineConfig, InMemoryConsentStore};
/// use berlin_consent_core::engine::NewConsent;
/// use berlin_consent_core::lifecycle::OutcomeRequest;
/// use berlin_consent_core::permissions::AccountPermissions;
/// use berlin_consent_core::types::{
///     AuthorisationType, ConsentStatus, ConsentType, Status,
/// };
///
/// let engine = ConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());
/// let consent = engine
///     .create_consent(NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({})))
///     .unwrap();
/// let a1 = engine.start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation).unwrap();
/// let a2 = engine.start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation).unwrap();
///
/// let accounts = AccountPermissions::from_access(&["iban:DE02:EUR"], &[], &[]).unwrap();
/// let first = engine
///     .record_outcome(&OutcomeRequest::approve(&consent.id, &a1.id, "psu-1").with_permissions(accounts.clone()))
///     .unwrap();
/// assert_eq!(first.status, Status::Consent(ConsentStatus::PartiallyAuthorised));
///
/// let second = engine
///     .record_outcome(&OutcomeRequest::approve(&consent.id, &a2.id, "psu-2").with_permissions(accounts))
///     .unwrap();
/// assert_eq!(second.status, Status::Consent(ConsentStatus::Valid));
/// ```
pub struct ConsentEngine<S: ConsentStore> {
    /// PSU verdicts and the consent transitions they cause.
    pub lifecycle: AuthorisationLifecycleManager<S>,
    /// Lazy expiry and data-retrieval accounting.
    pub expiry: ConsentExpiryEvaluator<S>,
    /// Request deduplication.
    pub idempotency: IdempotencyCache,
    store: Arc<S>,
    clock: SharedClock,
    locks: Arc<KeyedLocks>,
    config: EngineConfig,
}

impl<S: ConsentStore> ConsentEngine<S> {
    /// Construct an engine over `store` using wall-clock time.
    pub fn new(config: EngineConfig, store: S) -> Self {
        Self::with_clock(config, Arc::new(store), Arc::new(SystemClock))
    }

    /// Construct an engine over a shared store with an injected clock.
    ///
    /// Every component receives a clone of the same store handle, clock and
    /// lock table, so writes made through one are visible to all.
    pub fn with_clock(config: EngineConfig, store: Arc<S>, clock: SharedClock) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        Self {
            lifecycle: AuthorisationLifecycleManager::new(
                &config,
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&locks),
            ),
            expiry: ConsentExpiryEvaluator::new(
                &config,
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&locks),
            ),
            idempotency: IdempotencyCache::new(config.idempotency.clone(), Arc::clone(&clock)),
            store,
            clock,
            locks,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Consents
    // ------------------------------------------------------------------

    /// Persist a new consent in its type's initial status.
    pub fn create_consent(&self, request: NewConsent) -> Result<Consent, ConsentError> {
        let now_ms = self.clock.now_ms();
        let consent = self.store.create_consent(Consent {
            id: Uuid::new_v4().to_string(),
            client_id: request.client_id,
            consent_type: request.consent_type,
            status: request.consent_type.initial_status(),
            created_ms: now_ms,
            updated_ms: now_ms,
            valid_until_ms: request.valid_until_ms,
            recurring_indicator: request.recurring_indicator,
            receipt: request.receipt,
            attributes: request.attributes,
        })?;
        info!(
            consent_id = %consent.id,
            client_id = %consent.client_id,
            consent_type = %consent.consent_type,
            "consent created"
        );
        Ok(consent)
    }

    /// Fetch a consent on behalf of its owning client, applying lazy expiry.
    ///
    /// # Errors
    ///
    /// [`ConsentError::NotFound`] or [`ConsentError::ClientMismatch`].
    pub fn read_consent(&self, consent_id: &str, client_id: &str) -> Result<Consent, ConsentError> {
        let consent = self
            .store
            .get_consent(consent_id)?
            .ok_or_else(|| ConsentError::not_found("consent", consent_id))?;
        ensure_owner(&consent, client_id)?;
        let (consent, _) = self.expiry.evaluate_expiry(consent)?;
        Ok(consent)
    }

    /// Current status of a consent, after lazy expiry.
    pub fn consent_status(&self, consent_id: &str, client_id: &str) -> Result<Status, ConsentError> {
        self.read_consent(consent_id, client_id).map(|consent| consent.status)
    }

    /// End a valid accounts or funds-confirmation consent early.
    ///
    /// Lazy expiry runs first, so a consent past its validity period is
    /// refused as terminal.  All active account mappings are deactivated.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::ConsentTypeMismatch`] for payment consents.
    /// - [`ConsentError::TerminalConsent`] when the consent already ended.
    /// - [`ConsentError::ConsentNotValid`] when it was never authorised.
    pub fn revoke_consent(
        &self,
        consent_id: &str,
        client_id: &str,
        by: RevokedBy,
    ) -> Result<Consent, ConsentError> {
        let consent = self.read_consent(consent_id, client_id)?;
        if consent.consent_type.is_payment() {
            return Err(ConsentError::ConsentTypeMismatch {
                consent_id: consent_id.to_owned(),
                expected: ConsentType::Accounts.to_string(),
                actual: consent.consent_type.to_string(),
            });
        }

        let _guard = self.locks.lock(consent_id);
        let now_ms = self.clock.now_ms();
        let detailed = self
            .store
            .get_detailed_consent(consent_id)?
            .ok_or_else(|| ConsentError::not_found("consent", consent_id))?;
        let current = detailed.consent.status;
        if current.is_terminal() {
            return Err(ConsentError::TerminalConsent {
                consent_id: consent_id.to_owned(),
                status: current.to_string(),
            });
        }
        let target = Status::from(by.consent_status());
        if !current.can_transition_to(target) {
            return Err(ConsentError::ConsentNotValid {
                consent_id: consent_id.to_owned(),
                status: current.to_string(),
            });
        }

        let revoked = self.store.update_consent_status(consent_id, target, now_ms)?;
        let mapping_ids = detailed.active_mapping_ids();
        if !mapping_ids.is_empty() {
            self.store.deactivate_account_mappings(&mapping_ids)?;
        }
        info!(
            consent_id,
            status = %target,
            mappings = mapping_ids.len(),
            "consent revoked"
        );
        Ok(revoked)
    }

    // ------------------------------------------------------------------
    // Authorisations
    // ------------------------------------------------------------------

    /// Open a new authorisation in `received` on a consent.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::NotFound`] or [`ConsentError::ClientMismatch`].
    /// - [`ConsentError::ConsentTypeMismatch`] for a cancellation
    ///   authorisation on a non-payment consent.
    /// - [`ConsentError::TerminalConsent`] when the consent already ended.
    /// - [`ConsentError::AuthorisationNotAllowed`] when the status takes no
    ///   new authorisation of this type: origination once the consent is
    ///   decided, cancellation before the payment is accepted.
    pub fn start_authorisation(
        &self,
        consent_id: &str,
        client_id: &str,
        auth_type: AuthorisationType,
    ) -> Result<Authorisation, ConsentError> {
        let consent = self.read_consent(consent_id, client_id)?;
        if auth_type == AuthorisationType::Cancellation && !consent.consent_type.is_payment() {
            return Err(ConsentError::ConsentTypeMismatch {
                consent_id: consent_id.to_owned(),
                expected: ConsentType::Payments.to_string(),
                actual: consent.consent_type.to_string(),
            });
        }

        let _guard = self.locks.lock(consent_id);
        let now_ms = self.clock.now_ms();
        let status = self
            .store
            .get_consent(consent_id)?
            .ok_or_else(|| ConsentError::not_found("consent", consent_id))?
            .status;
        if status.is_terminal() {
            return Err(ConsentError::TerminalConsent {
                consent_id: consent_id.to_owned(),
                status: status.to_string(),
            });
        }
        if !status.accepts_authorisation(auth_type) {
            return Err(ConsentError::AuthorisationNotAllowed {
                consent_id: consent_id.to_owned(),
                auth_type: auth_type.to_string(),
                status: status.to_string(),
            });
        }

        let authorisation = self.store.create_authorisation(Authorisation {
            id: Uuid::new_v4().to_string(),
            consent_id: consent_id.to_owned(),
            auth_type,
            user_id: None,
            status: ScaStatus::Received,
            created_ms: now_ms,
            updated_ms: now_ms,
        })?;
        info!(
            consent_id,
            authorisation_id = %authorisation.id,
            auth_type = %auth_type,
            "authorisation started"
        );
        Ok(authorisation)
    }

    /// Lazy expiry runs first, so a verdict arriving after the validity
    /// period ends is refused like any other on a terminal consent.
    ///
    /// See [`AuthorisationLifecycleManager::record_outcome`].
    pub fn record_outcome(&self, request: &OutcomeRequest) -> Result<OutcomeReport, ConsentError> {
        if let Some(consent) = self.store.get_consent(&request.consent_id)? {
            self.expiry.evaluate_expiry(consent)?;
        }
        self.lifecycle.record_outcome(request)
    }

    /// See [`ConsentExpiryEvaluator::record_data_retrieval`].
    pub fn record_data_retrieval(
        &self,
        consent_id: &str,
        client_id: &str,
    ) -> Result<DataRetrieval, ConsentError> {
        self.expiry.record_data_retrieval(consent_id, client_id)
    }

    // ------------------------------------------------------------------
    // Idempotency
    // ------------------------------------------------------------------

    /// The cache key for `request`, or `None` when the request is not a
    /// deduplicated write or the cache is disabled.
    ///
    /// # Errors
    ///
    /// [`ConsentError::MissingIdempotencyKey`] when a deduplicated write
    /// carries no usable header.
    pub fn idempotency_key(
        &self,
        request: &RequestKind,
        client_id: &str,
        header: Option<&str>,
    ) -> Result<Option<IdempotencyKey>, ConsentError> {
        let Some(elected) = request.elected_resource() else {
            return Ok(None);
        };
        if !self.idempotency.is_enabled() {
            return Ok(None);
        }
        IdempotencyKey::derive(client_id, elected.as_str(), header.unwrap_or_default()).map(Some)
    }

    /// See [`IdempotencyCache::check_and_record`].
    pub fn check_and_record(
        &self,
        key: &IdempotencyKey,
        payload: &[u8],
    ) -> Result<Admission, ConsentError> {
        self.idempotency.check_and_record(key, payload)
    }

    /// See [`IdempotencyCache::record_response`].
    pub fn record_response(&self, key: &IdempotencyKey, response: CachedResponse) {
        self.idempotency.record_response(key, response);
    }

    /// See [`IdempotencyCache::abandon`].
    pub fn abandon(&self, key: &IdempotencyKey) {
        self.idempotency.abandon(key);
    }

    /// Run `handler` at most once per idempotency key.
    ///
    /// Requests that are not deduplicated writes run the handler directly.
    /// For the others the key is derived from `client_id`, the elected
    /// resource and `header`; a retry with the same payload replays the
    /// recorded response and a different payload is refused.
    ///
    /// # Errors
    ///
    /// [`ConsentError::MissingIdempotencyKey`],
    /// [`ConsentError::IdempotencyConflict`],
    /// [`ConsentError::IdempotencyInFlight`] or whatever `handler` returns.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use berlin_consent_core::{ConsentEngine, EngineConfig, InMemoryConsentStore};
    /// use berlin_consent_core::idempotency::CachedResponse;
    /// use berlin_consent_core::routing::{Method, RequestKind};
    ///
    /// let engine = ConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());
    /// let request = RequestKind::parse(Method::Post, "/payments/sepa-credit-transfers").unwrap();
    /// let payload = br#"{"amount":"10.00"}"#;
    ///
    /// let first = engine
    ///     .execute_idempotent(&request, "tpp-1", Some("k-1"), payload, || {
    ///         Ok(CachedResponse::new(201, "p-1"))
    ///     })
    ///     .unwrap();
    /// let retry = engine
    ///     .execute_idempotent(&request, "tpp-1", Some("k-1"), payload, || unreachable!())
    ///     .unwrap();
    /// assert!(!first.is_replay());
    /// assert_eq!(retry.response(), first.response());
    /// ```
    pub fn execute_idempotent<F>(
        &self,
        request: &RequestKind,
        client_id: &str,
        header: Option<&str>,
        payload: &[u8],
        handler: F,
    ) -> Result<Execution, ConsentError>
    where
        F: FnOnce() -> Result<CachedResponse, ConsentError>,
    {
        match self.idempotency_key(request, client_id, header)? {
            Some(key) => self.idempotency.execute(&key, payload, handler),
            None => handler().map(Execution::Fresh),
        }
    }
}

fn ensure_owner(consent: &Consent, client_id: &str) -> Result<(), ConsentError> {
    if consent.client_id == client_id {
        Ok(())
    } else {
        Err(ConsentError::ClientMismatch {
            consent_id: consent.id.clone(),
            client_id: client_id.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{ManualClock, DAY_MS};
    use crate::config::IdempotencyConfig;
    use crate::permissions::AccountPermissions;
    use crate::routing::Method;
    use crate::storage::InMemoryConsentStore;
    use crate::testing::T0;
    use crate::types::{AggregateStatus, AccountReference, ConsentStatus, TransactionStatus};

    struct Harness {
        engine: ConsentEngine<InMemoryConsentStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: EngineConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let engine =
            ConsentEngine::with_clock(config, Arc::new(InMemoryConsentStore::new()), clock.clone());
        Harness { engine, clock }
    }

    fn accounts() -> AccountPermissions {
        AccountPermissions::from_access(&["iban:DE02:EUR"], &["iban:DE02:EUR"], &[]).unwrap()
    }

    fn new_accounts_consent(engine: &ConsentEngine<InMemoryConsentStore>) -> Consent {
        engine
            .create_consent(
                NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({}))
                    .valid_until(T0 + 30 * DAY_MS)
                    .recurring(),
            )
            .unwrap()
    }

    fn start(engine: &ConsentEngine<InMemoryConsentStore>, consent_id: &str) -> Authorisation {
        engine
            .start_authorisation(consent_id, "tpp-1", AuthorisationType::Authorisation)
            .unwrap()
    }

    fn authorise(engine: &ConsentEngine<InMemoryConsentStore>, consent_id: &str) {
        let auth = start(engine, consent_id);
        engine
            .record_outcome(
                &OutcomeRequest::approve(consent_id, &auth.id, "psu-1").with_permissions(accounts()),
            )
            .unwrap();
    }

    #[test]
    fn two_approvals_make_the_consent_valid() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);
        assert_eq!(consent.status, Status::Consent(ConsentStatus::Received));
        let a1 = start(&h.engine, &consent.id);
        let a2 = start(&h.engine, &consent.id);

        let first = h
            .engine
            .record_outcome(&OutcomeRequest::approve(&consent.id, &a1.id, "psu-1").with_permissions(accounts()))
            .unwrap();
        assert_eq!(first.aggregate, AggregateStatus::PartiallyAuthorised);
        assert_eq!(first.status, Status::Consent(ConsentStatus::PartiallyAuthorised));

        let second = h
            .engine
            .record_outcome(&OutcomeRequest::approve(&consent.id, &a2.id, "psu-1").with_permissions(accounts()))
            .unwrap();
        assert_eq!(second.aggregate, AggregateStatus::FullyAuthorised);
        assert_eq!(second.status, Status::Consent(ConsentStatus::Valid));

        let detailed = h.engine.store().get_detailed_consent(&consent.id).unwrap().unwrap();
        assert!(!detailed.active_mapping_ids().is_empty());
    }

    #[test]
    fn one_denial_rejects_the_consent() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);
        let a1 = start(&h.engine, &consent.id);
        let _a2 = start(&h.engine, &consent.id);

        let report = h
            .engine
            .record_outcome(&OutcomeRequest::deny(&consent.id, &a1.id, "psu-1"))
            .unwrap();
        assert_eq!(report.aggregate, AggregateStatus::Rejected);
        assert_eq!(
            h.engine.consent_status(&consent.id, "tpp-1").unwrap(),
            Status::Consent(ConsentStatus::Rejected)
        );
    }

    #[test]
    fn read_consent_checks_ownership_and_expires_lazily() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);
        authorise(&h.engine, &consent.id);

        let err = h.engine.read_consent(&consent.id, "tpp-2").unwrap_err();
        assert!(matches!(err, ConsentError::ClientMismatch { .. }));
        assert!(matches!(
            h.engine.read_consent("missing", "tpp-1"),
            Err(ConsentError::NotFound { .. })
        ));

        h.clock.advance_ms(31 * DAY_MS);
        let read = h.engine.read_consent(&consent.id, "tpp-1").unwrap();
        assert_eq!(read.status, Status::Consent(ConsentStatus::Expired));
    }

    #[test]
    fn start_authorisation_guards() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);

        let err = h
            .engine
            .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Cancellation)
            .unwrap_err();
        assert!(matches!(err, ConsentError::ConsentTypeMismatch { .. }));

        let err = h
            .engine
            .start_authorisation(&consent.id, "tpp-2", AuthorisationType::Authorisation)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        authorise(&h.engine, &consent.id);
        h.engine.revoke_consent(&consent.id, "tpp-1", RevokedBy::Tpp).unwrap();
        let err = h
            .engine
            .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
            .unwrap_err();
        assert!(matches!(err, ConsentError::TerminalConsent { .. }));
    }

    #[test]
    fn decided_consents_take_no_new_origination() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);
        authorise(&h.engine, &consent.id);

        let err = h
            .engine
            .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
            .unwrap_err();
        assert!(matches!(err, ConsentError::AuthorisationNotAllowed { .. }));
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            h.engine.consent_status(&consent.id, "tpp-1").unwrap(),
            Status::Consent(ConsentStatus::Valid)
        );
        let detailed = h.engine.store().get_detailed_consent(&consent.id).unwrap().unwrap();
        assert_eq!(detailed.authorisations.len(), 1);
    }

    #[test]
    fn payment_authorisation_types_follow_payment_status() {
        let h = harness(EngineConfig::default());
        let payment = h
            .engine
            .create_consent(NewConsent::new("tpp-1", ConsentType::Payments, serde_json::json!({})))
            .unwrap();

        // Nothing to cancel before the payment is accepted.
        let err = h
            .engine
            .start_authorisation(&payment.id, "tpp-1", AuthorisationType::Cancellation)
            .unwrap_err();
        assert!(matches!(err, ConsentError::AuthorisationNotAllowed { .. }));

        let auth = start(&h.engine, &payment.id);
        let debtor = AccountReference::new("iban", "DE02", Some("EUR"));
        h.engine
            .record_outcome(
                &OutcomeRequest::approve(&payment.id, &auth.id, "psu-1")
                    .with_permissions(AccountPermissions::for_debtor(debtor)),
            )
            .unwrap();

        let err = h
            .engine
            .start_authorisation(&payment.id, "tpp-1", AuthorisationType::Authorisation)
            .unwrap_err();
        assert!(matches!(err, ConsentError::AuthorisationNotAllowed { .. }));
        assert_eq!(
            h.engine.consent_status(&payment.id, "tpp-1").unwrap(),
            Status::Transaction(TransactionStatus::Actc)
        );
    }

    #[test]
    fn partially_approved_payment_is_rejected_by_one_denial() {
        let h = harness(EngineConfig::default());
        let payment = h
            .engine
            .create_consent(NewConsent::new("tpp-1", ConsentType::BulkPayments, serde_json::json!({})))
            .unwrap();
        let a1 = start(&h.engine, &payment.id);
        let a2 = start(&h.engine, &payment.id);
        let debtor = AccountReference::new("iban", "DE02", Some("EUR"));

        let report = h
            .engine
            .record_outcome(
                &OutcomeRequest::approve(&payment.id, &a1.id, "psu-1")
                    .with_permissions(AccountPermissions::for_debtor(debtor)),
            )
            .unwrap();
        assert_eq!(report.status, Status::Transaction(TransactionStatus::Patc));

        let err = h
            .engine
            .start_authorisation(&payment.id, "tpp-1", AuthorisationType::Cancellation)
            .unwrap_err();
        assert!(matches!(err, ConsentError::AuthorisationNotAllowed { .. }));

        let report = h
            .engine
            .record_outcome(&OutcomeRequest::deny(&payment.id, &a2.id, "psu-2"))
            .unwrap();
        assert_eq!(report.aggregate, AggregateStatus::Rejected);
        assert_eq!(report.status, Status::Transaction(TransactionStatus::Rjct));
        let detailed = h.engine.store().get_detailed_consent(&payment.id).unwrap().unwrap();
        assert!(detailed.active_mapping_ids().is_empty());
    }

    #[test]
    fn verdict_after_validity_period_is_refused() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);
        authorise(&h.engine, &consent.id);
        // Written straight to the store: a valid consent takes no new start.
        let late = h
            .engine
            .store()
            .create_authorisation(Authorisation {
                id: "late".into(),
                consent_id: consent.id.clone(),
                auth_type: AuthorisationType::Authorisation,
                user_id: None,
                status: ScaStatus::Received,
                created_ms: T0,
                updated_ms: T0,
            })
            .unwrap();

        h.clock.advance_ms(31 * DAY_MS);
        let err = h
            .engine
            .record_outcome(&OutcomeRequest::approve(&consent.id, &late.id, "psu-2").with_permissions(accounts()))
            .unwrap_err();
        assert!(matches!(err, ConsentError::TerminalConsent { .. }));
        assert_eq!(
            h.engine.consent_status(&consent.id, "tpp-1").unwrap(),
            Status::Consent(ConsentStatus::Expired)
        );
        let detailed = h.engine.store().get_detailed_consent(&consent.id).unwrap().unwrap();
        let pending = detailed.authorisations.iter().find(|a| a.id == late.id).unwrap();
        assert_eq!(pending.status, ScaStatus::Received);
    }

    #[test]
    fn revocation_deactivates_mappings_and_is_final() {
        let h = harness(EngineConfig::default());
        let consent = new_accounts_consent(&h.engine);
        authorise(&h.engine, &consent.id);

        let revoked = h.engine.revoke_consent(&consent.id, "tpp-1", RevokedBy::Psu).unwrap();
        assert_eq!(revoked.status, Status::Consent(ConsentStatus::RevokedByPsu));
        let detailed = h.engine.store().get_detailed_consent(&consent.id).unwrap().unwrap();
        assert!(detailed.active_mapping_ids().is_empty());

        let err = h.engine.revoke_consent(&consent.id, "tpp-1", RevokedBy::Tpp).unwrap_err();
        assert!(matches!(err, ConsentError::TerminalConsent { .. }));
    }

    #[test]
    fn revocation_refuses_expired_and_unauthorised_consents() {
        let h = harness(EngineConfig::default());
        let pending = new_accounts_consent(&h.engine);
        let err = h.engine.revoke_consent(&pending.id, "tpp-1", RevokedBy::Tpp).unwrap_err();
        assert!(matches!(err, ConsentError::ConsentNotValid { .. }));

        let consent = new_accounts_consent(&h.engine);
        authorise(&h.engine, &consent.id);
        h.clock.advance_ms(31 * DAY_MS);
        let err = h.engine.revoke_consent(&consent.id, "tpp-1", RevokedBy::Psu).unwrap_err();
        assert!(matches!(err, ConsentError::TerminalConsent { .. }));
        assert_eq!(
            h.engine.consent_status(&consent.id, "tpp-1").unwrap(),
            Status::Consent(ConsentStatus::Expired)
        );
    }

    #[test]
    fn payments_are_not_revocable() {
        let h = harness(EngineConfig::default());
        let payment = h
            .engine
            .create_consent(NewConsent::new("tpp-1", ConsentType::Payments, serde_json::json!({})))
            .unwrap();
        assert_eq!(payment.status, Status::Transaction(TransactionStatus::Rcvd));
        let err = h.engine.revoke_consent(&payment.id, "tpp-1", RevokedBy::Tpp).unwrap_err();
        assert!(matches!(err, ConsentError::ConsentTypeMismatch { .. }));
    }

    #[test]
    fn payment_cancellation_flow() {
        let h = harness(EngineConfig::default());
        let payment = h
            .engine
            .create_consent(NewConsent::new("tpp-1", ConsentType::Payments, serde_json::json!({})))
            .unwrap();
        let auth = start(&h.engine, &payment.id);
        let debtor = AccountReference::new("iban", "DE02", Some("EUR"));
        let report = h
            .engine
            .record_outcome(
                &OutcomeRequest::approve(&payment.id, &auth.id, "psu-1")
                    .with_permissions(AccountPermissions::for_debtor(debtor)),
            )
            .unwrap();
        assert_eq!(report.status, Status::Transaction(TransactionStatus::Actc));

        let cancel = h
            .engine
            .start_authorisation(&payment.id, "tpp-1", AuthorisationType::Cancellation)
            .unwrap();
        let report = h
            .engine
            .record_outcome(&OutcomeRequest::approve(&payment.id, &cancel.id, "psu-1").cancellation())
            .unwrap();
        assert_eq!(report.status, Status::Transaction(TransactionStatus::Canc));
    }

    #[test]
    fn data_retrieval_consumes_one_off_consents() {
        let h = harness(EngineConfig::default());
        let consent = h
            .engine
            .create_consent(NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({})))
            .unwrap();
        authorise(&h.engine, &consent.id);

        let retrieval = h.engine.record_data_retrieval(&consent.id, "tpp-1").unwrap();
        assert!(retrieval.consumed);
        assert!(!retrieval.accounts.is_empty());
        let err = h.engine.record_data_retrieval(&consent.id, "tpp-1").unwrap_err();
        assert!(matches!(err, ConsentError::ConsentNotValid { .. }));
    }

    #[test]
    fn idempotent_creation_runs_once() {
        let h = harness(EngineConfig::default());
        let request = RequestKind::parse(Method::Post, "/consents").unwrap();
        let payload = br#"{"recurringIndicator":true}"#;
        let mut created = Vec::new();

        for _ in 0..3 {
            let execution = h
                .engine
                .execute_idempotent(&request, "tpp-1", Some("key-1"), payload, || {
                    let consent = h.engine.create_consent(NewConsent::new(
                        "tpp-1",
                        ConsentType::Accounts,
                        serde_json::json!({}),
                    ))?;
                    created.push(consent.id.clone());
                    Ok(CachedResponse::new(201, consent.id))
                })
                .unwrap();
            assert_eq!(execution.response().status, 201);
        }
        assert_eq!(created.len(), 1);

        let err = h
            .engine
            .execute_idempotent(&request, "tpp-1", Some("key-1"), b"{}", || unreachable!())
            .unwrap_err();
        assert!(matches!(err, ConsentError::IdempotencyConflict { .. }));
    }

    #[test]
    fn idempotency_key_requirements() {
        let h = harness(EngineConfig::default());
        let create = RequestKind::parse(Method::Post, "/consents").unwrap();
        let read = RequestKind::parse(Method::Get, "/consents/c-1").unwrap();

        assert!(matches!(
            h.engine.idempotency_key(&create, "tpp-1", None),
            Err(ConsentError::MissingIdempotencyKey)
        ));
        assert_eq!(h.engine.idempotency_key(&read, "tpp-1", None).unwrap(), None);
        let key = h.engine.idempotency_key(&create, "tpp-1", Some("k")).unwrap().unwrap();
        assert_eq!(key.as_str(), "tpp-1_accounts_k");

        let disabled = harness(EngineConfig {
            idempotency: IdempotencyConfig { enabled: false, ..IdempotencyConfig::default() },
            ..EngineConfig::default()
        });
        assert_eq!(disabled.engine.idempotency_key(&create, "tpp-1", None).unwrap(), None);
    }

    #[test]
    fn explicit_check_record_and_abandon() {
        let h = harness(EngineConfig::default());
        let request = RequestKind::parse(Method::Post, "/consents/c-1/authorisations").unwrap();
        let key = h.engine.idempotency_key(&request, "tpp-1", Some("k")).unwrap().unwrap();

        assert!(matches!(h.engine.check_and_record(&key, b"{}").unwrap(), Admission::FirstSeen));
        h.engine.abandon(&key);
        assert!(matches!(h.engine.check_and_record(&key, b"{}").unwrap(), Admission::FirstSeen));
        h.engine.record_response(&key, CachedResponse::new(201, "a-1"));
        match h.engine.check_and_record(&key, b"{ }").unwrap() {
            Admission::Duplicate(response) => assert_eq!(response.body, b"a-1"),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }
}

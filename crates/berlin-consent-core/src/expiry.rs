// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Lazy, write-on-read consent expiry.
//!
//! No scheduler sweeps consents.  Every read of an accounts consent passes
//! through [`ConsentExpiryEvaluator::evaluate_expiry`], which writes the
//! `expired` status the first time a reader observes that the consent has
//! outlived its validity period or gone unused for too long.
//!
//! One-off consents (`recurringIndicator = false`) additionally expire right
//! after their first data retrieval.

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{SharedClock, DAY_MS};
use crate::config::EngineConfig;
use crate::error::ConsentError;
use crate::locks::KeyedLocks;
use crate::storage::ConsentStore;
use crate::types::{AccountMapping, Consent, ConsentStatus, ConsentType, Status};

/// Whether an accounts consent has run out of time at `now_ms`.
///
/// True when `now_ms` is past `valid_until_ms`, or when the consent was last
/// updated more than `inactivity_days` days before `now_ms`.  Consents of
/// other types never time out.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::expiry::is_time_expired;
/// # use berlin_consent_core::types::{Consent, ConsentType, ConsentStatus};
/// # let consent = Consent {
/// #     id: "c".into(), client_id: "tpp".into(), consent_type: ConsentType::Accounts,
/// #     status: ConsentStatus::Valid.into(), created_ms: 0, updated_ms: 0,
/// #     valid_until_ms: Some(1_000), recurring_indicator: true,
/// #     receipt: serde_json::Value::Null, attributes: Default::default(),
/// # };
///
/// assert!(!is_time_expired(&consent, 1_000, 90));
/// assert!(is_time_expired(&consent, 1_001, 90));
/// ```
pub fn is_time_expired(consent: &Consent, now_ms: u64, inactivity_days: u32) -> bool {
    if consent.consent_type != ConsentType::Accounts {
        return false;
    }
    if let Some(valid_until_ms) = consent.valid_until_ms {
        if now_ms > valid_until_ms {
            return true;
        }
    }
    let inactivity_ms = u64::from(inactivity_days).saturating_mul(DAY_MS);
    consent.updated_ms.saturating_add(inactivity_ms) < now_ms
}

/// Result of a successful [`ConsentExpiryEvaluator::record_data_retrieval`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataRetrieval {
    /// The consent after the retrieval was recorded.
    pub consent: Consent,
    /// Active account mappings the caller may serve data for.
    pub accounts: Vec<AccountMapping>,
    /// Whether this retrieval used up a one-off consent.
    pub consumed: bool,
}

pub struct ConsentExpiryEvaluator<S: ConsentStore> {
    store: Arc<S>,
    clock: SharedClock,
    locks: Arc<KeyedLocks>,
    inactivity_days: u32,
}

impl<S: ConsentStore> ConsentExpiryEvaluator<S> {
    pub fn new(config: &EngineConfig, store: Arc<S>, clock: SharedClock, locks: Arc<KeyedLocks>) -> Self {
        Self {
            store,
            clock,
            locks,
            inactivity_days: config.consent_inactivity_days,
        }
    }

    /// Apply lazy expiry to `consent` and report whether it is expired.
    ///
    /// Only `valid` accounts consents are ever rewritten.  A consent already
    /// `expired` is reported as such; consents in any other status pass
    /// through untouched.
    ///
    /// # Errors
    ///
    /// [`ConsentError::Store`] when the expiry write fails, and
    /// [`ConsentError::NotFound`] when the consent vanished meanwhile.
    pub fn evaluate_expiry(&self, consent: Consent) -> Result<(Consent, bool), ConsentError> {
        let now_ms = self.clock.now_ms();
        if !self.needs_expiry(&consent, now_ms) {
            let expired = consent.status == Status::Consent(ConsentStatus::Expired);
            return Ok((consent, expired));
        }

        let _guard = self.locks.lock(&consent.id);
        let fresh = self
            .store
            .get_consent(&consent.id)?
            .ok_or_else(|| ConsentError::not_found("consent", &consent.id))?;
        self.expire_if_due(fresh, now_ms)
    }

    /// Record one account-data retrieval against an accounts consent.
    ///
    /// The consent must belong to `client_id`, still be `valid` after lazy
    /// expiry, and have at least one active account mapping.  A one-off
    /// consent is expired and its mappings deactivated before returning.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::NotFound`] for an unknown consent.
    /// - [`ConsentError::ClientMismatch`] when another client owns it.
    /// - [`ConsentError::ConsentTypeMismatch`] for non-accounts consents.
    /// - [`ConsentError::ConsentNotValid`] when it is not `valid` or has no
    ///   active mapping.
    pub fn record_data_retrieval(
        &self,
        consent_id: &str,
        client_id: &str,
    ) -> Result<DataRetrieval, ConsentError> {
        let _guard = self.locks.lock(consent_id);
        let now_ms = self.clock.now_ms();

        let detailed = self
            .store
            .get_detailed_consent(consent_id)?
            .ok_or_else(|| ConsentError::not_found("consent", consent_id))?;
        if detailed.consent.client_id != client_id {
            return Err(ConsentError::ClientMismatch {
                consent_id: consent_id.to_owned(),
                client_id: client_id.to_owned(),
            });
        }
        if detailed.consent.consent_type != ConsentType::Accounts {
            return Err(ConsentError::ConsentTypeMismatch {
                consent_id: consent_id.to_owned(),
                expected: ConsentType::Accounts.to_string(),
                actual: detailed.consent.consent_type.to_string(),
            });
        }

        let (consent, _) = self.expire_if_due(detailed.consent, now_ms)?;
        let accounts: Vec<AccountMapping> =
            detailed.mappings.into_iter().filter(|mapping| mapping.active).collect();
        if consent.status != Status::Consent(ConsentStatus::Valid) || accounts.is_empty() {
            return Err(ConsentError::ConsentNotValid {
                consent_id: consent.id,
                status: consent.status.to_string(),
            });
        }

        if consent.recurring_indicator {
            return Ok(DataRetrieval { consent, accounts, consumed: false });
        }

        let consent = self.expire(&consent.id, now_ms)?;
        info!(consent_id = %consent.id, "one-off consent consumed by data retrieval");
        Ok(DataRetrieval { consent, accounts, consumed: true })
    }

    fn needs_expiry(&self, consent: &Consent, now_ms: u64) -> bool {
        consent.status == Status::Consent(ConsentStatus::Valid)
            && is_time_expired(consent, now_ms, self.inactivity_days)
    }

    /// Caller holds the consent lock.
    fn expire_if_due(&self, consent: Consent, now_ms: u64) -> Result<(Consent, bool), ConsentError> {
        if !self.needs_expiry(&consent, now_ms) {
            let expired = consent.status == Status::Consent(ConsentStatus::Expired);
            return Ok((consent, expired));
        }
        let expired = self.expire(&consent.id, now_ms)?;
        info!(
            consent_id = %expired.id,
            valid_until_ms = ?consent.valid_until_ms,
            last_updated_ms = consent.updated_ms,
            "consent expired on read"
        );
        Ok((expired, true))
    }

    /// Caller holds the consent lock.
    fn expire(&self, consent_id: &str, now_ms: u64) -> Result<Consent, ConsentError> {
        let updated = self
            .store
            .update_consent_status(consent_id, ConsentStatus::Expired.into(), now_ms)?;
        if let Some(detailed) = self.store.get_detailed_consent(consent_id)? {
            let mapping_ids = detailed.active_mapping_ids();
            if !mapping_ids.is_empty() {
                self.store.deactivate_account_mappings(&mapping_ids)?;
                debug!(consent_id, deactivated = mapping_ids.len(), "account mappings deactivated");
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::AccountPermissions;
    use crate::storage::InMemoryConsentStore;
    use crate::testing::{authorisation, consent, Fixture, T0};
    use crate::types::{AuthorisationType, ScaStatus};

    fn evaluator(fx: &Fixture) -> ConsentExpiryEvaluator<InMemoryConsentStore> {
        ConsentExpiryEvaluator::new(
            &EngineConfig::default(),
            fx.store.clone(),
            fx.clock.clone(),
            Arc::new(KeyedLocks::new()),
        )
    }

    /// A valid accounts consent with one active mapping.
    fn valid(fx: &Fixture, id: &str, recurring: bool, valid_until_ms: Option<u64>) -> Consent {
        let mut c = consent(id, ConsentType::Accounts);
        c.recurring_indicator = recurring;
        c.valid_until_ms = valid_until_ms;
        fx.insert(c);
        let auth_id = format!("{id}-a");
        fx.store
            .create_authorisation(authorisation(&auth_id, id, AuthorisationType::Authorisation))
            .unwrap();
        fx.store
            .bind_account_mappings(
                id,
                &auth_id,
                &AccountPermissions::from_access(&["iban:A"], &[], &[]).unwrap(),
                ScaStatus::Finalised,
                ConsentStatus::Valid.into(),
                T0,
            )
            .unwrap();
        fx.store.get_consent(id).unwrap().unwrap()
    }

    #[test]
    fn live_consent_passes_through() {
        let fx = Fixture::new();
        let c = valid(&fx, "c", true, Some(T0 + DAY_MS));
        let (read, expired) = evaluator(&fx).evaluate_expiry(c.clone()).unwrap();
        assert!(!expired);
        assert_eq!(read, c);
    }

    #[test]
    fn past_valid_until_expires_on_read() {
        let fx = Fixture::new();
        let c = valid(&fx, "c", true, Some(T0 + DAY_MS));
        fx.clock.advance_ms(DAY_MS + 1);

        let (read, expired) = evaluator(&fx).evaluate_expiry(c).unwrap();

        assert!(expired);
        assert_eq!(read.status, ConsentStatus::Expired.into());
        assert_eq!(fx.status("c"), ConsentStatus::Expired.into());
        assert_eq!(fx.active_mappings("c"), 0);
    }

    #[test]
    fn inactivity_window_expires_consent() {
        let fx = Fixture::new();
        let c = valid(&fx, "c", true, None);
        fx.clock.advance_ms(90 * DAY_MS);
        assert!(!evaluator(&fx).evaluate_expiry(c.clone()).unwrap().1);

        fx.clock.advance_ms(1);
        assert!(evaluator(&fx).evaluate_expiry(c).unwrap().1);
    }

    #[test]
    fn revoked_consent_is_not_rewritten() {
        let fx = Fixture::new();
        valid(&fx, "c", true, Some(T0));
        let revoked = fx
            .store
            .update_consent_status("c", ConsentStatus::RevokedByPsu.into(), T0)
            .unwrap();
        fx.clock.advance_ms(DAY_MS);

        let (read, expired) = evaluator(&fx).evaluate_expiry(revoked).unwrap();

        assert!(!expired);
        assert_eq!(read.status, ConsentStatus::RevokedByPsu.into());
        assert_eq!(fx.status("c"), ConsentStatus::RevokedByPsu.into());
    }

    #[test]
    fn one_off_consent_expires_after_first_retrieval() {
        let fx = Fixture::new();
        valid(&fx, "c", false, None);
        let evaluator = evaluator(&fx);

        let first = evaluator.record_data_retrieval("c", "tpp-1").unwrap();
        assert!(first.consumed);
        assert_eq!(first.accounts.len(), 1);
        assert_eq!(fx.status("c"), ConsentStatus::Expired.into());

        let err = evaluator.record_data_retrieval("c", "tpp-1").unwrap_err();
        assert!(matches!(err, ConsentError::ConsentNotValid { .. }));
    }

    #[test]
    fn recurring_consent_survives_retrievals() {
        let fx = Fixture::new();
        valid(&fx, "c", true, None);
        let evaluator = evaluator(&fx);
        for _ in 0..3 {
            assert!(!evaluator.record_data_retrieval("c", "tpp-1").unwrap().consumed);
        }
        assert_eq!(fx.status("c"), ConsentStatus::Valid.into());
    }

    #[test]
    fn retrieval_checks_owner_type_and_mappings() {
        let fx = Fixture::new();
        valid(&fx, "c", true, None);
        fx.insert(consent("f", ConsentType::FundsConfirmation));
        let mut bare = consent("bare", ConsentType::Accounts);
        bare.status = ConsentStatus::Valid.into();
        fx.insert(bare);
        let evaluator = evaluator(&fx);

        assert!(matches!(
            evaluator.record_data_retrieval("c", "tpp-2").unwrap_err(),
            ConsentError::ClientMismatch { .. }
        ));
        assert!(matches!(
            evaluator.record_data_retrieval("f", "tpp-1").unwrap_err(),
            ConsentError::ConsentTypeMismatch { .. }
        ));
        assert!(matches!(
            evaluator.record_data_retrieval("bare", "tpp-1").unwrap_err(),
            ConsentError::ConsentNotValid { .. }
        ));
        assert!(matches!(
            evaluator.record_data_retrieval("ghost", "tpp-1").unwrap_err(),
            ConsentError::NotFound { .. }
        ));
    }
}

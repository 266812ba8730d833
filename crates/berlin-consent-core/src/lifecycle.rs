// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Authorisation lifecycle management.
//!
//! [`AuthorisationLifecycleManager::record_outcome`] applies one PSU verdict
//! to one authorisation and drives the owning consent through its state
//! machine:
//!
//! 1. validate the authorisation against the consent the caller expected
//! 2. persist the authorisation's new SCA status
//! 3. re-read every authorisation of the same type and aggregate
//! 4. map the aggregate to a consent status through the state-change hook
//!    for the consent's type, and apply it
//!
//! The whole sequence runs under a per-consent lock, so two verdicts on the
//! same consent never interleave and a repeated approval cannot bind account
//! mappings twice.  Supersession of older recurring consents runs after that
//! lock is released and takes its own.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::aggregate::aggregate_status;
use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::error::ConsentError;
use crate::locks::KeyedLocks;
use crate::permissions::AccountPermissions;
use crate::storage::ConsentStore;
use crate::supersede::RecurringConsentSuperseder;
use crate::types::{
    AggregateStatus, AuthorisationType, ConsentStatus, ConsentType, Outcome, Status,
    TransactionStatus,
};

// ---------------------------------------------------------------------------
// State-change hook
// ---------------------------------------------------------------------------

/// The consent status an aggregate verdict moves a consent to, or `None`
/// when the verdict does not change the consent yet.
///
/// | consent type                  | authorisation | FULL        | PARTIAL               | REJECTED   |
/// |-------------------------------|---------------|-------------|-----------------------|------------|
/// | accounts, funds-confirmation  | authorisation | `valid`     | `partiallyAuthorised` | `rejected` |
/// | payments (all three)          | authorisation | `ACTC`      | `PATC`                | `RJCT`     |
/// | payments (all three)          | cancellation  | `CANC`      | none                  | `ACTC`     |
///
/// A declined cancellation is only applied to a payment that is already
/// `ACTC`; [`AuthorisationLifecycleManager::record_outcome`] leaves any
/// other status alone.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::lifecycle::status_for_aggregate;
/// use berlin_consent_core::types::{
///     AggregateStatus, AuthorisationType, ConsentType, Status, TransactionStatus,
/// };
///
/// let next = status_for_aggregate(
///     ConsentType::Payments,
///     AuthorisationType::Cancellation,
///     AggregateStatus::Rejected,
/// );
/// assert_eq!(next, Some(Status::Transaction(TransactionStatus::Actc)));
/// ```
pub fn status_for_aggregate(
    consent_type: ConsentType,
    auth_type: AuthorisationType,
    aggregate: AggregateStatus,
) -> Option<Status> {
    use AggregateStatus::*;

    if aggregate == Pending {
        return None;
    }
    match (consent_type.is_payment(), auth_type) {
        (false, AuthorisationType::Authorisation) => Some(
            match aggregate {
                FullyAuthorised => ConsentStatus::Valid,
                PartiallyAuthorised => ConsentStatus::PartiallyAuthorised,
                _ => ConsentStatus::Rejected,
            }
            .into(),
        ),
        (false, AuthorisationType::Cancellation) => None,
        (true, AuthorisationType::Authorisation) => Some(
            match aggregate {
                FullyAuthorised => TransactionStatus::Actc,
                PartiallyAuthorised => TransactionStatus::Patc,
                _ => TransactionStatus::Rjct,
            }
            .into(),
        ),
        (true, AuthorisationType::Cancellation) => match aggregate {
            FullyAuthorised => Some(TransactionStatus::Canc.into()),
            Rejected => Some(TransactionStatus::Actc.into()),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// One PSU verdict on one authorisation.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::lifecycle::OutcomeRequest;
/// use berlin_consent_core::permissions::AccountPermissions;
/// use berlin_consent_core::types::{AuthorisationType, Outcome};
///
/// let request = OutcomeRequest::approve("consent-1", "auth-1", "psu-1")
///     .with_permissions(AccountPermissions::from_access(&["iban:DE02:EUR"], &[], &[]).unwrap());
/// assert_eq!(request.outcome, Outcome::Approved);
/// assert_eq!(request.auth_type, AuthorisationType::Authorisation);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRequest {
    /// The consent the caller believes the authorisation belongs to.
    pub consent_id: String,
    pub authorisation_id: String,
    /// The authorisation type the caller's flow expects.
    pub auth_type: AuthorisationType,
    pub outcome: Outcome,
    /// The PSU who completed SCA, bound to the authorisation.
    pub user_id: Option<String>,
    /// Accounts the PSU selected.  Ignored for denials.
    pub permissions: AccountPermissions,
}

impl OutcomeRequest {
    pub fn new(consent_id: &str, authorisation_id: &str, outcome: Outcome) -> Self {
        Self {
            consent_id: consent_id.to_owned(),
            authorisation_id: authorisation_id.to_owned(),
            auth_type: AuthorisationType::Authorisation,
            outcome,
            user_id: None,
            permissions: AccountPermissions::new(),
        }
    }

    pub fn approve(consent_id: &str, authorisation_id: &str, user_id: &str) -> Self {
        Self::new(consent_id, authorisation_id, Outcome::Approved).with_user(user_id)
    }

    pub fn deny(consent_id: &str, authorisation_id: &str, user_id: &str) -> Self {
        Self::new(consent_id, authorisation_id, Outcome::Denied).with_user(user_id)
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_owned());
        self
    }

    pub fn with_permissions(mut self, permissions: AccountPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn cancellation(mut self) -> Self {
        self.auth_type = AuthorisationType::Cancellation;
        self
    }
}

/// What [`AuthorisationLifecycleManager::record_outcome`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeReport {
    pub consent_id: String,
    pub authorisation_id: String,
    pub aggregate: AggregateStatus,
    /// The consent's status after the call.
    pub status: Status,
    /// Whether the consent status changed.
    pub transitioned: bool,
    /// Recurring consents expired because this one became valid.
    pub superseded: Vec<String>,
}

// ---------------------------------------------------------------------------
// AuthorisationLifecycleManager
// ---------------------------------------------------------------------------

/// Applies PSU verdicts and the consent transitions they cause.
pub struct AuthorisationLifecycleManager<S: ConsentStore> {
    store: Arc<S>,
    clock: SharedClock,
    locks: Arc<KeyedLocks>,
    superseder: RecurringConsentSuperseder<S>,
}

impl<S: ConsentStore> AuthorisationLifecycleManager<S> {
    pub fn new(config: &EngineConfig, store: Arc<S>, clock: SharedClock, locks: Arc<KeyedLocks>) -> Self {
        Self {
            superseder: RecurringConsentSuperseder::new(config, Arc::clone(&store), Arc::clone(&locks)),
            store,
            clock,
            locks,
        }
    }

    /// Record one PSU verdict and apply the resulting consent transition.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::NotFound`] for an unknown authorisation or consent.
    /// - [`ConsentError::ConsentMismatch`] when the authorisation belongs to a
    ///   different consent than `request.consent_id`.
    /// - [`ConsentError::AuthTypeMismatch`] when its type differs from
    ///   `request.auth_type`.
    /// - [`ConsentError::TerminalConsent`] when the consent can no longer
    ///   change status.
    /// - [`ConsentError::AuthorisationAlreadyDecided`] when a verdict was
    ///   already recorded on the authorisation.
    /// - [`ConsentError::InvalidStateTransition`] when the aggregate maps to a
    ///   status the consent cannot move to.  The authorisation status is
    ///   already persisted at that point.
    /// - [`ConsentError::Store`] for any store failure, without rollback.
    pub fn record_outcome(&self, request: &OutcomeRequest) -> Result<OutcomeReport, ConsentError> {
        let guard = self.locks.lock(&request.consent_id);
        let now_ms = self.clock.now_ms();

        let authorisation = self
            .store
            .get_authorisation(&request.authorisation_id)?
            .ok_or_else(|| ConsentError::not_found("authorisation", &request.authorisation_id))?;

        if authorisation.consent_id != request.consent_id {
            warn!(
                consent_id = %request.consent_id,
                authorisation_id = %request.authorisation_id,
                owner = %authorisation.consent_id,
                "authorisation used against a foreign consent"
            );
            return Err(ConsentError::ConsentMismatch {
                consent_id: request.consent_id.clone(),
                authorisation_id: request.authorisation_id.clone(),
            });
        }
        if authorisation.auth_type != request.auth_type {
            return Err(ConsentError::AuthTypeMismatch {
                authorisation_id: authorisation.id,
                expected: request.auth_type.to_string(),
                actual: authorisation.auth_type.to_string(),
            });
        }

        let consent = self
            .store
            .get_consent(&request.consent_id)?
            .ok_or_else(|| ConsentError::not_found("consent", &request.consent_id))?;
        if consent.status.is_terminal() {
            return Err(ConsentError::TerminalConsent {
                consent_id: consent.id,
                status: consent.status.to_string(),
            });
        }
        if authorisation.status.is_decided() {
            return Err(ConsentError::AuthorisationAlreadyDecided {
                authorisation_id: authorisation.id,
                status: authorisation.status.to_string(),
            });
        }

        let sca_status = request.outcome.sca_status();
        self.store.update_authorisation_status(
            &authorisation.id,
            sca_status,
            request.user_id.as_deref(),
            now_ms,
        )?;
        debug!(
            consent_id = %consent.id,
            authorisation_id = %authorisation.id,
            sca_status = %sca_status,
            "authorisation status updated"
        );

        let authorisations = self.store.search_authorisations(&consent.id)?;
        let aggregate = aggregate_status(&authorisations, authorisation.auth_type);
        debug!(consent_id = %consent.id, %aggregate, "aggregate computed");

        let mut report = OutcomeReport {
            consent_id: consent.id.clone(),
            authorisation_id: authorisation.id.clone(),
            aggregate,
            status: consent.status,
            transitioned: false,
            superseded: Vec::new(),
        };

        // A declined cancellation only confirms a payment that is already
        // accepted; it never accepts one.
        let next = status_for_aggregate(consent.consent_type, authorisation.auth_type, aggregate)
            .filter(|next| {
                authorisation.auth_type == AuthorisationType::Authorisation
                    || aggregate != AggregateStatus::Rejected
                    || consent.status == *next
            });
        let Some(next) = next else {
            debug!(consent_id = %consent.id, %aggregate, "no consent transition yet");
            return Ok(report);
        };

        if !consent.status.can_transition_to(next) {
            return Err(ConsentError::InvalidStateTransition {
                consent_id: consent.id,
                from: consent.status.to_string(),
                to: next.to_string(),
            });
        }

        match aggregate {
            AggregateStatus::Rejected => {
                self.store.update_consent_status(&consent.id, next, now_ms)?;
                if authorisation.auth_type == AuthorisationType::Authorisation {
                    self.deactivate_all_mappings(&consent.id)?;
                }
            }
            _ => {
                let permissions = match request.outcome {
                    Outcome::Approved => request.permissions.clone(),
                    Outcome::Denied => AccountPermissions::new(),
                };
                self.store.bind_account_mappings(
                    &consent.id,
                    &authorisation.id,
                    &permissions,
                    sca_status,
                    next,
                    now_ms,
                )?;
            }
        }
        info!(
            consent_id = %consent.id,
            authorisation_id = %authorisation.id,
            from = %consent.status,
            to = %next,
            %aggregate,
            "consent transition applied"
        );
        report.status = next;
        report.transitioned = consent.status != next;

        drop(guard);

        if next == Status::Consent(ConsentStatus::Valid) {
            let user_id = request.user_id.as_deref().or(authorisation.user_id.as_deref());
            match user_id {
                Some(user_id) => {
                    let mut current = consent;
                    current.status = next;
                    report.superseded = self.superseder.supersede(&current, user_id, now_ms)?;
                }
                None => debug!(consent_id = %report.consent_id, "no PSU bound, supersession skipped"),
            }
        }

        Ok(report)
    }

    fn deactivate_all_mappings(&self, consent_id: &str) -> Result<(), ConsentError> {
        let Some(detailed) = self.store.get_detailed_consent(consent_id)? else {
            return Err(ConsentError::not_found("consent", consent_id));
        };
        let mapping_ids = detailed.active_mapping_ids();
        if !mapping_ids.is_empty() {
            self.store.deactivate_account_mappings(&mapping_ids)?;
            debug!(consent_id, deactivated = mapping_ids.len(), "account mappings deactivated");
        }
        Ok(())
    }
}

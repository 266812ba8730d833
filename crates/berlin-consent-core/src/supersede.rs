// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Recurring-consent supersession.
//!
//! Only one recurring accounts consent may be active per PSU and TPP unless
//! the deployment enables multiple recurring consents.  When a new recurring
//! consent becomes fully authorised, every older one of the same client and
//! PSU is expired and its account mappings deactivated.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::ConsentError;
use crate::locks::KeyedLocks;
use crate::storage::{ConsentFilter, ConsentStore};
use crate::types::{Consent, ConsentStatus, ConsentType, Status};

pub struct RecurringConsentSuperseder<S: ConsentStore> {
    store: Arc<S>,
    locks: Arc<KeyedLocks>,
    multiple_recurring_enabled: bool,
}

impl<S: ConsentStore> RecurringConsentSuperseder<S> {
    pub fn new(config: &EngineConfig, store: Arc<S>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            store,
            locks,
            multiple_recurring_enabled: config.multiple_recurring_consent_enabled,
        }
    }

    /// Expire the recurring accounts consents `current` replaces.
    ///
    /// Candidates are `valid` accounts consents of the same client bound to
    /// `user_id`, carrying the recurring flag and exactly one authorisation.
    /// `current` itself is never touched.  Returns the ids of the expired
    /// consents.
    ///
    /// Each candidate is expired while holding both its lock and the lock of
    /// `current`, taken in id order, and only if both are still `valid` at
    /// that point.  The caller must not hold either lock.
    ///
    /// # Errors
    ///
    /// [`ConsentError::Store`] when a search or update fails.  Consents
    /// expired before the failure stay expired.
    pub fn supersede(
        &self,
        current: &Consent,
        user_id: &str,
        now_ms: u64,
    ) -> Result<Vec<String>, ConsentError> {
        if self.multiple_recurring_enabled
            || !current.recurring_indicator
            || current.consent_type != ConsentType::Accounts
        {
            return Ok(Vec::new());
        }

        let filter = ConsentFilter::default()
            .client(&current.client_id)
            .consent_type(ConsentType::Accounts)
            .status(ConsentStatus::Valid)
            .user(user_id);

        let mut superseded = Vec::new();
        for candidate in self.store.search_consents(&filter)? {
            let candidate_id = candidate.consent.id;
            if candidate_id == current.id || !candidate.consent.recurring_indicator {
                continue;
            }

            let (low, high) = if candidate_id < current.id {
                (candidate_id.as_str(), current.id.as_str())
            } else {
                (current.id.as_str(), candidate_id.as_str())
            };
            let _low = self.locks.lock(low);
            let _high = self.locks.lock(high);

            if !self.is_valid(&current.id)? {
                debug!(consent_id = %current.id, "consent left valid, supersession stopped");
                break;
            }
            let Some(fresh) = self.store.get_detailed_consent(&candidate_id)? else {
                continue;
            };
            if fresh.consent.status != Status::Consent(ConsentStatus::Valid)
                || fresh.authorisations.len() != 1
            {
                debug!(consent_id = %candidate_id, status = %fresh.consent.status, "candidate changed, skipped");
                continue;
            }

            self.store
                .update_consent_status(&candidate_id, ConsentStatus::Expired.into(), now_ms)?;
            let mapping_ids = fresh.active_mapping_ids();
            if !mapping_ids.is_empty() {
                self.store.deactivate_account_mappings(&mapping_ids)?;
            }

            info!(
                consent_id = %candidate_id,
                superseded_by = %current.id,
                deactivated = mapping_ids.len(),
                "recurring consent superseded"
            );
            superseded.push(candidate_id);
        }

        if superseded.is_empty() {
            debug!(consent_id = %current.id, "no recurring consent to supersede");
        }
        Ok(superseded)
    }

    fn is_valid(&self, consent_id: &str) -> Result<bool, ConsentError> {
        Ok(self
            .store
            .get_consent(consent_id)?
            .is_some_and(|consent| consent.status == Status::Consent(ConsentStatus::Valid)))
    }
}

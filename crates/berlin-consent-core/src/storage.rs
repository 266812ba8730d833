// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Storage abstraction for the consent engine.
//!
//! The [`ConsentStore`] trait is the single interface between the engine and
//! any persistence layer.  Every method is one transaction: it either applies
//! completely or returns a [`StoreError`] having changed nothing.
//!
//! This crate ships [`InMemoryConsentStore`] for development and testing.
//! Durable backends live in downstream crates; they can reuse [`ConsentTables`]
//! for the record-keeping and only add their own persistence around it.
//!
//! # Implementing `ConsentStore`
//!
//! Wrap a [`ConsentTables`] and delegate, persisting after each mutation:
//!
//! ```rust,no_run
//! use parking_lot::Mutex;
//! use berlin_consent_core::storage::{ConsentStore, ConsentTables};
//!
//! struct MyStore {
//!     tables: Mutex<ConsentTables>,
//! }
//!
//! impl MyStore {
//!     fn persist(&self, _tables: &ConsentTables) -> Result<(), berlin_consent_core::StoreError> {
//!         Ok(()) // write to your backend
//!     }
//! }
//! ```

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::permissions::AccountPermissions;
use crate::types::{
    AccountMapping, Authorisation, Consent, ConsentType, DetailedConsent, ScaStatus, Status,
};

// ---------------------------------------------------------------------------
// ConsentFilter
// ---------------------------------------------------------------------------

/// Criteria for [`ConsentStore::search_consents`].  Unset fields match
/// everything.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::storage::ConsentFilter;
/// use berlin_consent_core::types::{ConsentStatus, ConsentType};
///
/// let filter = ConsentFilter::default()
///     .client("tpp-1")
///     .consent_type(ConsentType::Accounts)
///     .status(ConsentStatus::Valid)
///     .user("psu-1");
/// assert_eq!(filter.user_id.as_deref(), Some("psu-1"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentFilter {
    pub client_id: Option<String>,
    pub consent_type: Option<ConsentType>,
    pub status: Option<Status>,
    /// Matches consents with at least one authorisation bound to this user.
    pub user_id: Option<String>,
}

impl ConsentFilter {
    pub fn client(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_owned());
        self
    }

    pub fn consent_type(mut self, consent_type: ConsentType) -> Self {
        self.consent_type = Some(consent_type);
        self
    }

    pub fn status(mut self, status: impl Into<Status>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_owned());
        self
    }

    fn matches(&self, consent: &Consent, authorisations: &[Authorisation]) -> bool {
        if let Some(ref client_id) = self.client_id {
            if &consent.client_id != client_id {
                return false;
            }
        }
        if let Some(consent_type) = self.consent_type {
            if consent.consent_type != consent_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if consent.status != status {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if !authorisations
                .iter()
                .any(|auth| auth.user_id.as_deref() == Some(user_id.as_str()))
            {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// ConsentStore trait
// ---------------------------------------------------------------------------

/// Pluggable persistence interface for the consent engine.
///
/// Lookups return `Ok(None)` for unknown identifiers; writes against an
/// unknown identifier fail with [`StoreError::Missing`].
///
/// Implementations MUST be `Send + Sync`: the engine shares one store between
/// all request threads and serialises its own read-aggregate-write sequences.
pub trait ConsentStore: Send + Sync {
    // ------------------------------------------------------------------
    // Consents
    // ------------------------------------------------------------------

    fn get_consent(&self, id: &str) -> Result<Option<Consent>, StoreError>;

    /// The consent plus every authorisation and mapping it owns.
    fn get_detailed_consent(&self, id: &str) -> Result<Option<DetailedConsent>, StoreError>;

    fn create_consent(&self, consent: Consent) -> Result<Consent, StoreError>;

    fn update_consent_status(
        &self,
        id: &str,
        status: Status,
        now_ms: u64,
    ) -> Result<Consent, StoreError>;

    fn search_consents(&self, filter: &ConsentFilter) -> Result<Vec<DetailedConsent>, StoreError>;

    // ------------------------------------------------------------------
    // Authorisations
    // ------------------------------------------------------------------

    fn get_authorisation(&self, id: &str) -> Result<Option<Authorisation>, StoreError>;

    fn create_authorisation(&self, authorisation: Authorisation)
        -> Result<Authorisation, StoreError>;

    /// Set the SCA status, binding `user_id` in the same write when given.
    fn update_authorisation_status(
        &self,
        id: &str,
        status: ScaStatus,
        user_id: Option<&str>,
        now_ms: u64,
    ) -> Result<Authorisation, StoreError>;

    /// All authorisations of a consent, in creation order.
    fn search_authorisations(&self, consent_id: &str) -> Result<Vec<Authorisation>, StoreError>;

    // ------------------------------------------------------------------
    // Account mappings
    // ------------------------------------------------------------------

    /// In one transaction: set the authorisation to `auth_status`, set the
    /// consent to `consent_status` and insert one active mapping per
    /// (account, permission) pair in `permissions`.
    ///
    /// Pairs already actively bound for the same authorisation are skipped.
    /// Returns `true` when at least one mapping row was created.
    fn bind_account_mappings(
        &self,
        consent_id: &str,
        authorisation_id: &str,
        permissions: &AccountPermissions,
        auth_status: ScaStatus,
        consent_status: Status,
        now_ms: u64,
    ) -> Result<bool, StoreError>;

    /// Mark the given mappings inactive.  Returns `true` when every id was
    /// found.
    fn deactivate_account_mappings(&self, mapping_ids: &[String]) -> Result<bool, StoreError>;
}

impl<S: ConsentStore + ?Sized> ConsentStore for Arc<S> {
    fn get_consent(&self, id: &str) -> Result<Option<Consent>, StoreError> {
        (**self).get_consent(id)
    }

    fn get_detailed_consent(&self, id: &str) -> Result<Option<DetailedConsent>, StoreError> {
        (**self).get_detailed_consent(id)
    }

    fn create_consent(&self, consent: Consent) -> Result<Consent, StoreError> {
        (**self).create_consent(consent)
    }

    fn update_consent_status(&self, id: &str, status: Status, now_ms: u64) -> Result<Consent, StoreError> {
        (**self).update_consent_status(id, status, now_ms)
    }

    fn search_consents(&self, filter: &ConsentFilter) -> Result<Vec<DetailedConsent>, StoreError> {
        (**self).search_consents(filter)
    }

    fn get_authorisation(&self, id: &str) -> Result<Option<Authorisation>, StoreError> {
        (**self).get_authorisation(id)
    }

    fn create_authorisation(&self, authorisation: Authorisation) -> Result<Authorisation, StoreError> {
        (**self).create_authorisation(authorisation)
    }

    fn update_authorisation_status(
        &self,
        id: &str,
        status: ScaStatus,
        user_id: Option<&str>,
        now_ms: u64,
    ) -> Result<Authorisation, StoreError> {
        (**self).update_authorisation_status(id, status, user_id, now_ms)
    }

    fn search_authorisations(&self, consent_id: &str) -> Result<Vec<Authorisation>, StoreError> {
        (**self).search_authorisations(consent_id)
    }

    fn bind_account_mappings(
        &self,
        consent_id: &str,
        authorisation_id: &str,
        permissions: &AccountPermissions,
        auth_status: ScaStatus,
        consent_status: Status,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        (**self).bind_account_mappings(
            consent_id,
            authorisation_id,
            permissions,
            auth_status,
            consent_status,
            now_ms,
        )
    }

    fn deactivate_account_mappings(&self, mapping_ids: &[String]) -> Result<bool, StoreError> {
        (**self).deactivate_account_mappings(mapping_ids)
    }
}

// ---------------------------------------------------------------------------
// ConsentTables
// ---------------------------------------------------------------------------

/// The three consent tables as plain data, with the record-keeping every
/// backend shares.
///
/// Not synchronised; backends wrap it in a lock.  Serialises to a
/// `{consents, authorisations, mappings}` document.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConsentTables {
    consents: HashMap<String, Consent>,
    authorisations: HashMap<String, Authorisation>,
    mappings: HashMap<String, AccountMapping>,
}

impl ConsentTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_consent(&self, id: &str) -> Option<Consent> {
        self.consents.get(id).cloned()
    }

    pub fn get_authorisation(&self, id: &str) -> Option<Authorisation> {
        self.authorisations.get(id).cloned()
    }

    pub fn get_detailed_consent(&self, id: &str) -> Option<DetailedConsent> {
        self.consents.get(id).map(|consent| self.detail(consent))
    }

    pub fn search_authorisations(&self, consent_id: &str) -> Vec<Authorisation> {
        let mut found: Vec<Authorisation> = self
            .authorisations
            .values()
            .filter(|auth| auth.consent_id == consent_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_ms.cmp(&b.created_ms).then_with(|| a.id.cmp(&b.id)));
        found
    }

    pub fn search_consents(&self, filter: &ConsentFilter) -> Vec<DetailedConsent> {
        let mut found: Vec<DetailedConsent> = self
            .consents
            .values()
            .map(|consent| self.detail(consent))
            .filter(|detailed| filter.matches(&detailed.consent, &detailed.authorisations))
            .collect();
        found.sort_by(|a, b| {
            a.consent
                .created_ms
                .cmp(&b.consent.created_ms)
                .then_with(|| a.consent.id.cmp(&b.consent.id))
        });
        found
    }

    pub fn create_consent(&mut self, consent: Consent) -> Result<Consent, StoreError> {
        if self.consents.contains_key(&consent.id) {
            return Err(StoreError::Backend(format!("consent {} already exists", consent.id)));
        }
        self.consents.insert(consent.id.clone(), consent.clone());
        Ok(consent)
    }

    pub fn create_authorisation(
        &mut self,
        authorisation: Authorisation,
    ) -> Result<Authorisation, StoreError> {
        if !self.consents.contains_key(&authorisation.consent_id) {
            return Err(missing("consent", &authorisation.consent_id));
        }
        if self.authorisations.contains_key(&authorisation.id) {
            return Err(StoreError::Backend(format!(
                "authorisation {} already exists",
                authorisation.id
            )));
        }
        self.authorisations
            .insert(authorisation.id.clone(), authorisation.clone());
        Ok(authorisation)
    }

    pub fn update_consent_status(
        &mut self,
        id: &str,
        status: Status,
        now_ms: u64,
    ) -> Result<Consent, StoreError> {
        let consent = self.consents.get_mut(id).ok_or_else(|| missing("consent", id))?;
        if leaves_terminal(consent.status, status) {
            return Err(StoreError::Terminal { id: id.to_owned(), status: consent.status.to_string() });
        }
        consent.status = status;
        consent.updated_ms = now_ms;
        Ok(consent.clone())
    }

    pub fn update_authorisation_status(
        &mut self,
        id: &str,
        status: ScaStatus,
        user_id: Option<&str>,
        now_ms: u64,
    ) -> Result<Authorisation, StoreError> {
        let auth = self
            .authorisations
            .get_mut(id)
            .ok_or_else(|| missing("authorisation", id))?;
        auth.status = status;
        if let Some(user_id) = user_id {
            auth.user_id = Some(user_id.to_owned());
        }
        auth.updated_ms = now_ms;
        Ok(auth.clone())
    }

    pub fn bind_account_mappings(
        &mut self,
        consent_id: &str,
        authorisation_id: &str,
        permissions: &AccountPermissions,
        auth_status: ScaStatus,
        consent_status: Status,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        // Validate everything before the first write.
        let current = self
            .consents
            .get(consent_id)
            .ok_or_else(|| missing("consent", consent_id))?
            .status;
        if leaves_terminal(current, consent_status) {
            return Err(StoreError::Terminal {
                id: consent_id.to_owned(),
                status: current.to_string(),
            });
        }
        match self.authorisations.get(authorisation_id) {
            Some(auth) if auth.consent_id == consent_id => {}
            Some(_) => {
                return Err(StoreError::Backend(format!(
                    "authorisation {authorisation_id} does not belong to consent {consent_id}"
                )))
            }
            None => return Err(missing("authorisation", authorisation_id)),
        }

        self.update_authorisation_status(authorisation_id, auth_status, None, now_ms)?;
        self.update_consent_status(consent_id, consent_status, now_ms)?;

        let mut created = false;
        for (account, permission) in permissions.iter() {
            let already_bound = self.mappings.values().any(|mapping| {
                mapping.active
                    && mapping.authorisation_id == authorisation_id
                    && mapping.account == *account
                    && mapping.permission == permission
            });
            if already_bound {
                continue;
            }
            let id = uuid::Uuid::new_v4().to_string();
            self.mappings.insert(
                id.clone(),
                AccountMapping {
                    id,
                    consent_id: consent_id.to_owned(),
                    authorisation_id: authorisation_id.to_owned(),
                    account: account.clone(),
                    permission,
                    active: true,
                },
            );
            created = true;
        }
        Ok(created)
    }

    pub fn deactivate_account_mappings(&mut self, mapping_ids: &[String]) -> bool {
        let mut all_found = true;
        for id in mapping_ids {
            match self.mappings.get_mut(id) {
                Some(mapping) => mapping.active = false,
                None => all_found = false,
            }
        }
        all_found
    }

    fn detail(&self, consent: &Consent) -> DetailedConsent {
        let mut mappings: Vec<AccountMapping> = self
            .mappings
            .values()
            .filter(|mapping| mapping.consent_id == consent.id)
            .cloned()
            .collect();
        mappings.sort_by(|a, b| {
            a.account
                .cmp(&b.account)
                .then_with(|| a.permission.cmp(&b.permission))
                .then_with(|| a.id.cmp(&b.id))
        });
        DetailedConsent {
            consent: consent.clone(),
            authorisations: self.search_authorisations(&consent.id),
            mappings,
        }
    }
}

fn missing(entity: &'static str, id: &str) -> StoreError {
    StoreError::Missing { entity, id: id.to_owned() }
}

/// Terminal statuses are absorbing at the store level too.
fn leaves_terminal(current: Status, next: Status) -> bool {
    current.is_terminal() && current != next
}

// ---------------------------------------------------------------------------
// InMemoryConsentStore
// ---------------------------------------------------------------------------

/// A volatile [`ConsentStore`] backed by [`ConsentTables`] behind a
/// [`parking_lot::RwLock`].
///
/// All data lives in process memory and is lost when the store is dropped.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::storage::{ConsentStore, InMemoryConsentStore};
///
/// let store = InMemoryConsentStore::new();
/// assert!(store.get_consent("unknown").unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryConsentStore {
    tables: RwLock<ConsentTables>,
}

impl InMemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from existing tables.
    pub fn from_tables(tables: ConsentTables) -> Self {
        Self { tables: RwLock::new(tables) }
    }

    /// A copy of the current tables.
    pub fn snapshot(&self) -> ConsentTables {
        self.tables.read().clone()
    }
}

impl ConsentStore for InMemoryConsentStore {
    fn get_consent(&self, id: &str) -> Result<Option<Consent>, StoreError> {
        Ok(self.tables.read().get_consent(id))
    }

    fn get_detailed_consent(&self, id: &str) -> Result<Option<DetailedConsent>, StoreError> {
        Ok(self.tables.read().get_detailed_consent(id))
    }

    fn create_consent(&self, consent: Consent) -> Result<Consent, StoreError> {
        self.tables.write().create_consent(consent)
    }

    fn update_consent_status(&self, id: &str, status: Status, now_ms: u64) -> Result<Consent, StoreError> {
        self.tables.write().update_consent_status(id, status, now_ms)
    }

    fn search_consents(&self, filter: &ConsentFilter) -> Result<Vec<DetailedConsent>, StoreError> {
        Ok(self.tables.read().search_consents(filter))
    }

    fn get_authorisation(&self, id: &str) -> Result<Option<Authorisation>, StoreError> {
        Ok(self.tables.read().get_authorisation(id))
    }

    fn create_authorisation(&self, authorisation: Authorisation) -> Result<Authorisation, StoreError> {
        self.tables.write().create_authorisation(authorisation)
    }

    fn update_authorisation_status(
        &self,
        id: &str,
        status: ScaStatus,
        user_id: Option<&str>,
        now_ms: u64,
    ) -> Result<Authorisation, StoreError> {
        self.tables
            .write()
            .update_authorisation_status(id, status, user_id, now_ms)
    }

    fn search_authorisations(&self, consent_id: &str) -> Result<Vec<Authorisation>, StoreError> {
        Ok(self.tables.read().search_authorisations(consent_id))
    }

    fn bind_account_mappings(
        &self,
        consent_id: &str,
        authorisation_id: &str,
        permissions: &AccountPermissions,
        auth_status: ScaStatus,
        consent_status: Status,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.tables.write().bind_account_mappings(
            consent_id,
            authorisation_id,
            permissions,
            auth_status,
            consent_status,
            now_ms,
        )
    }

    fn deactivate_account_mappings(&self, mapping_ids: &[String]) -> Result<bool, StoreError> {
        Ok(self.tables.write().deactivate_account_mappings(mapping_ids))
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Fixtures shared by the unit tests.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::clock::ManualClock;
use crate::storage::{ConsentStore, InMemoryConsentStore};
use crate::types::{
    Authorisation, AuthorisationType, Consent, ConsentType, ScaStatus, Status,
};

/// 2026-01-01T00:00:00Z.
pub const T0: u64 = 1_767_225_600_000;

pub fn consent(id: &str, consent_type: ConsentType) -> Consent {
    Consent {
        id: id.into(),
        client_id: "tpp-1".into(),
        consent_type,
        status: consent_type.initial_status(),
        created_ms: T0,
        updated_ms: T0,
        valid_until_ms: None,
        recurring_indicator: false,
        receipt: serde_json::json!({ "access": { "allPsd2": "allAccounts" } }),
        attributes: HashMap::new(),
    }
}

pub fn authorisation(id: &str, consent_id: &str, auth_type: AuthorisationType) -> Authorisation {
    Authorisation {
        id: id.into(),
        consent_id: consent_id.into(),
        auth_type,
        user_id: None,
        status: ScaStatus::Received,
        created_ms: T0,
        updated_ms: T0,
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryConsentStore>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryConsentStore::new()),
            clock: Arc::new(ManualClock::new(T0)),
        }
    }

    pub fn insert(&self, consent: Consent) -> Consent {
        self.store.create_consent(consent).unwrap()
    }

    /// One origination authorisation per id, all `received`.
    pub fn insert_with_auths(&self, consent: Consent, auth_ids: &[&str]) -> Consent {
        let consent = self.insert(consent);
        for auth_id in auth_ids {
            self.store
                .create_authorisation(authorisation(auth_id, &consent.id, AuthorisationType::Authorisation))
                .unwrap();
        }
        consent
    }

    pub fn status(&self, consent_id: &str) -> Status {
        self.store.get_consent(consent_id).unwrap().unwrap().status
    }

    pub fn active_mappings(&self, consent_id: &str) -> usize {
        self.store
            .get_detailed_consent(consent_id)
            .unwrap()
            .unwrap()
            .active_mapping_ids()
            .len()
    }
}

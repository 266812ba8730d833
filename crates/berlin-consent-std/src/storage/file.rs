// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! File-based JSON storage backend.
//!
//! [`FileConsentStore`] persists all consent state to a single JSON file on
//! disk.  Every mutation flushes the file atomically (write-rename) so that a
//! crash mid-write does not corrupt existing data.
//!
//! ## Layout
//!
//! ```json
//! {
//!   "consents":       { "<consent_id>":       Consent,        ... },
//!   "authorisations": { "<authorisation_id>": Authorisation,  ... },
//!   "mappings":       { "<mapping_id>":       AccountMapping, ... }
//! }
//! ```
//!
//! ## Caveats
//!
//! * The whole document is rewritten on every mutation.  It is not intended
//!   for high-frequency write workloads.
//! * Concurrent access from multiple processes is not supported.

use std::fs;
use std::path::{Path, PathBuf};

use berlin_consent_core::permissions::AccountPermissions;
use berlin_consent_core::storage::{ConsentFilter, ConsentStore, ConsentTables};
use berlin_consent_core::types::{Authorisation, Consent, DetailedConsent, ScaStatus, Status};
use berlin_consent_core::StoreError;
use parking_lot::Mutex;
use tracing::debug;

/// A file-backed [`ConsentStore`] that persists state as JSON.
///
/// A mutation is applied to a copy of the tables and only becomes visible
/// once that copy is on disk, so a failed flush leaves both the file and the
/// in-memory state at the previous version.
///
/// # Examples
///
/// ```rust,no_run
/// use berlin_consent_core::ConsentStore;
/// use berlin_consent_std::storage::file::FileConsentStore;
///
/// let store = FileConsentStore::open("/tmp/consents.json").expect("could not open store");
/// assert!(store.get_consent("unknown").unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct FileConsentStore {
    path: PathBuf,
    tables: Mutex<ConsentTables>,
}

impl FileConsentStore {
    /// Open an existing JSON store file, or start empty if the path does not
    /// exist.  The file is created by the first mutation.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file exists but cannot be read and
    /// [`StoreError::Serialization`] if its JSON is malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            ConsentTables::new()
        };
        debug!(path = %path.display(), "consent store opened");
        Ok(Self { path, tables: Mutex::new(tables) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state to disk.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] or [`StoreError::Serialization`].
    pub fn flush(&self) -> Result<(), StoreError> {
        let tables = self.tables.lock();
        self.write(&tables)
    }

    /// Write `tables` to `<path>.tmp`, then rename it over the target.
    fn write(&self, tables: &ConsentTables) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(tables)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn read<T>(&self, op: impl FnOnce(&ConsentTables) -> T) -> T {
        op(&*self.tables.lock())
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut ConsentTables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.lock();
        let mut next = tables.clone();
        let output = op(&mut next)?;
        self.write(&next)?;
        *tables = next;
        Ok(output)
    }
}

impl ConsentStore for FileConsentStore {
    fn get_consent(&self, id: &str) -> Result<Option<Consent>, StoreError> {
        Ok(self.read(|tables| tables.get_consent(id)))
    }

    fn get_detailed_consent(&self, id: &str) -> Result<Option<DetailedConsent>, StoreError> {
        Ok(self.read(|tables| tables.get_detailed_consent(id)))
    }

    fn create_consent(&self, consent: Consent) -> Result<Consent, StoreError> {
        self.mutate(|tables| tables.create_consent(consent))
    }

    fn update_consent_status(&self, id: &str, status: Status, now_ms: u64) -> Result<Consent, StoreError> {
        self.mutate(|tables| tables.update_consent_status(id, status, now_ms))
    }

    fn search_consents(&self, filter: &ConsentFilter) -> Result<Vec<DetailedConsent>, StoreError> {
        Ok(self.read(|tables| tables.search_consents(filter)))
    }

    fn get_authorisation(&self, id: &str) -> Result<Option<Authorisation>, StoreError> {
        Ok(self.read(|tables| tables.get_authorisation(id)))
    }

    fn create_authorisation(&self, authorisation: Authorisation) -> Result<Authorisation, StoreError> {
        self.mutate(|tables| tables.create_authorisation(authorisation))
    }

    fn update_authorisation_status(
        &self,
        id: &str,
        status: ScaStatus,
        user_id: Option<&str>,
        now_ms: u64,
    ) -> Result<Authorisation, StoreError> {
        self.mutate(|tables| tables.update_authorisation_status(id, status, user_id, now_ms))
    }

    fn search_authorisations(&self, consent_id: &str) -> Result<Vec<Authorisation>, StoreError> {
        Ok(self.read(|tables| tables.search_authorisations(consent_id)))
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
        self.mutate(|tables| {
            tables.bind_account_mappings(
                consent_id,
                authorisation_id,
                permissions,
                auth_status,
                consent_status,
                now_ms,
            )
        })
    }

    fn deactivate_account_mappings(&self, mapping_ids: &[String]) -> Result<bool, StoreError> {
        self.mutate(|tables| Ok(tables.deactivate_account_mappings(mapping_ids)))
    }
}

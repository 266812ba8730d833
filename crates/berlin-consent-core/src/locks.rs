// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Per-key mutual exclusion.
//!
//! [`KeyedLocks`] lets one holder at a time own a key (a consent id, in
//! practice) so read-aggregate-write sequences on the same consent are
//! serialised while different consents proceed in parallel.  Only held keys
//! are tracked; a key is forgotten as soon as its guard drops.

use hashbrown::HashSet;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Holds the lock for one key until dropped.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it.
    pub fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(key) {
            self.released.wait(&mut held);
        }
        held.insert(key.to_owned());
        KeyedGuard { owner: self, key: key.to_owned() }
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.owner.held.lock().remove(&self.key);
        // Waiters on other keys re-check and sleep again.
        self.owner.released.notify_all();
    }
}

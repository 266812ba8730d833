// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Idempotent request deduplication.
//!
//! A TPP retrying a POST with the same `x-idempotency-key` must get the first
//! attempt's response back rather than a second payment.  [`IdempotencyCache`]
//! remembers, per key, the hash of the request payload and, once recorded,
//! the response:
//!
//! ```text
//! check_and_record(key, payload)
//!   ├─ unseen / evicted        → store InFlight{hash}   → FirstSeen
//!   ├─ Complete, same hash     →                          Duplicate(response)
//!   ├─ any entry, other hash   →                          Conflict
//!   └─ InFlight, same hash     → wait for the response  → Duplicate / FirstSeen
//! ```
//!
//! The check and the insert happen under one mutex, so of two concurrent
//! requests bearing the same fresh key exactly one observes `FirstSeen`.
//! The other waits (at most `in_flight_wait_ms`) until the first records its
//! response or gives up.
//!
//! Entries live for `allowed_duration_secs`, inclusive.  An expired entry is
//! evicted when its key is next looked up, and every lookup prunes the whole
//! table at most once per [`PRUNE_INTERVAL_MS`].  There is no background
//! sweeper.  The cache is process-local; a multi-instance deployment needs a
//! shared store implementing the same contract.

use std::fmt;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::IdempotencyConfig;
use crate::error::ConsentError;

// ---------------------------------------------------------------------------
// Keys and hashes
// ---------------------------------------------------------------------------

/// Cache key scoped to one client and one elected resource.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::idempotency::IdempotencyKey;
///
/// let key = IdempotencyKey::derive("tpp-1", "payments", "a1b2").unwrap();
/// assert_eq!(key.as_str(), "tpp-1_payments_a1b2");
/// assert!(IdempotencyKey::derive("tpp-1", "payments", "  ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// # Errors
    ///
    /// [`ConsentError::MissingIdempotencyKey`] when `header` is blank.
    pub fn derive(client_id: &str, elected_resource: &str, header: &str) -> Result<Self, ConsentError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(ConsentError::MissingIdempotencyKey);
        }
        Ok(Self(format!("{client_id}_{elected_resource}_{header}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 of a request payload.
///
/// JSON payloads are hashed in canonical form (object keys sorted, no
/// insignificant whitespace), so two bodies that differ only in layout
/// compare equal.  Anything else is hashed as raw bytes.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::idempotency::hash_payload;
///
/// assert_eq!(
///     hash_payload(br#"{"amount": "10.00", "currency": "EUR"}"#),
///     hash_payload(br#"{"currency":"EUR","amount":"10.00"}"#),
/// );
/// assert_ne!(hash_payload(b"{\"amount\":\"10.00\"}"), hash_payload(b"{\"amount\":\"10.01\"}"));
/// ```
pub fn hash_payload(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    match serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|value| serde_json::to_vec(&value).ok())
    {
        Some(canonical) => {
            hasher.update(b"json\0");
            hasher.update(&canonical);
        }
        None => {
            hasher.update(b"raw\0");
            hasher.update(payload);
        }
    }
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

/// The response replayed to duplicate requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Result<Self, ConsentError> {
        let body = serde_json::to_vec(body).map_err(|e| ConsentError::Internal(e.to_string()))?;
        Ok(Self::new(status, body).with_header("content-type", "application/json"))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Whether the response is stored for replay (status below 400).
    pub fn is_cacheable(&self) -> bool {
        self.status < 400
    }
}

#[derive(Debug, Clone)]
enum Entry {
    InFlight { hash: String, created_ms: u64 },
    Complete { hash: String, created_ms: u64, response: CachedResponse },
}

impl Entry {
    fn hash(&self) -> &str {
        match self {
            Entry::InFlight { hash, .. } | Entry::Complete { hash, .. } => hash,
        }
    }

    fn created_ms(&self) -> u64 {
        match self {
            Entry::InFlight { created_ms, .. } | Entry::Complete { created_ms, .. } => *created_ms,
        }
    }
}

/// Verdict of [`IdempotencyCache::check_and_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First sight of the key: process the request, then call
    /// [`IdempotencyCache::record_response`] or [`IdempotencyCache::abandon`].
    FirstSeen,
    /// Same key, same payload: replay this response.
    Duplicate(CachedResponse),
    /// Same key, different payload.
    Conflict,
}

// ---------------------------------------------------------------------------
// IdempotencyCache
// ---------------------------------------------------------------------------

/// Minimum gap between two full prunes of expired entries.
pub const PRUNE_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<IdempotencyKey, Entry>,
    pruned_ms: u64,
}

pub struct IdempotencyCache {
    table: Mutex<Table>,
    settled: Condvar,
    clock: SharedClock,
    config: IdempotencyConfig,
}

impl IdempotencyCache {
    pub fn new(config: IdempotencyConfig, clock: SharedClock) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            settled: Condvar::new(),
            clock,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Atomically look up `key` and claim it when unseen.
    ///
    /// # Errors
    ///
    /// [`ConsentError::IdempotencyInFlight`] when an identical request holds
    /// the key for longer than `in_flight_wait_ms`.
    pub fn check_and_record(
        &self,
        key: &IdempotencyKey,
        payload: &[u8],
    ) -> Result<Admission, ConsentError> {
        if !self.config.enabled {
            return Ok(Admission::FirstSeen);
        }
        self.admit(key, hash_payload(payload))
    }

    /// Store the response of a request admitted as [`Admission::FirstSeen`].
    ///
    /// Responses with status 400 or above are not cached; the key is released
    /// so a retry is processed afresh.
    pub fn record_response(&self, key: &IdempotencyKey, response: CachedResponse) {
        self.complete(key, None, response);
    }

    /// Release an in-flight claim without recording a response.
    pub fn abandon(&self, key: &IdempotencyKey) {
        self.release(key, None);
    }

    /// Run `handler` at most once per key and payload.
    ///
    /// A duplicate request gets the cached response instead of running the
    /// handler.  A handler error or panic releases the key.
    ///
    /// # Errors
    ///
    /// [`ConsentError::IdempotencyConflict`] for a payload mismatch, the
    /// errors of [`check_and_record`](Self::check_and_record), and whatever
    /// `handler` returns.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use berlin_consent_core::clock::SystemClock;
    /// use berlin_consent_core::config::IdempotencyConfig;
    /// use berlin_consent_core::idempotency::{CachedResponse, Execution, IdempotencyCache, IdempotencyKey};
    ///
    /// let cache = IdempotencyCache::new(IdempotencyConfig::default(), Arc::new(SystemClock));
    /// let key = IdempotencyKey::derive("tpp-1", "payments", "k-1").unwrap();
    ///
    /// let first = cache.execute(&key, b"{}", || Ok(CachedResponse::new(201, "created"))).unwrap();
    /// assert!(matches!(first, Execution::Fresh(_)));
    ///
    /// let retry = cache.execute(&key, b"{}", || unreachable!()).unwrap();
    /// assert_eq!(retry.response().status, 201);
    /// ```
    pub fn execute<F>(
        &self,
        key: &IdempotencyKey,
        payload: &[u8],
        handler: F,
    ) -> Result<Execution, ConsentError>
    where
        F: FnOnce() -> Result<CachedResponse, ConsentError>,
    {
        if !self.config.enabled {
            return handler().map(Execution::Fresh);
        }
        let hash = hash_payload(payload);
        match self.admit(key, hash.clone())? {
            Admission::Duplicate(response) => Ok(Execution::Replayed(response)),
            Admission::Conflict => Err(ConsentError::IdempotencyConflict { key: key.to_string() }),
            Admission::FirstSeen => {
                let claim = Claim { cache: self, key, hash, settled: false };
                let response = handler()?;
                claim.complete(response.clone());
                Ok(Execution::Fresh(response))
            }
        }
    }

    /// Number of cached or in-flight keys, expired ones included until they
    /// are evicted or pruned.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn admit(&self, key: &IdempotencyKey, hash: String) -> Result<Admission, ConsentError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.in_flight_wait_ms);

        let mut table = self.table.lock();
        self.prune(&mut table);
        loop {
            let now_ms = self.clock.now_ms();
            if table.entries.get(key).is_some_and(|entry| self.is_expired(entry, now_ms)) {
                table.entries.remove(key);
                debug!(%key, "idempotency entry evicted");
            }

            match table.entries.get(key) {
                None => {
                    table.entries.insert(key.clone(), Entry::InFlight { hash, created_ms: now_ms });
                    debug!(%key, "idempotency key first seen");
                    return Ok(Admission::FirstSeen);
                }
                Some(entry) if entry.hash() != hash => {
                    warn!(%key, "idempotency key reused with a different payload");
                    return Ok(Admission::Conflict);
                }
                Some(Entry::Complete { response, .. }) => {
                    info!(%key, status = response.status, "replaying cached response");
                    return Ok(Admission::Duplicate(response.clone()));
                }
                Some(Entry::InFlight { .. }) => {
                    if Instant::now() >= deadline {
                        warn!(%key, "gave up waiting for in-flight request");
                        return Err(ConsentError::IdempotencyInFlight { key: key.to_string() });
                    }
                    debug!(%key, "waiting for in-flight request");
                    self.settled.wait_until(&mut table, deadline);
                }
            }
        }
    }

    /// Complete the in-flight claim on `key`.  With `claimant` set, only a
    /// claim made for that payload hash is completed.
    fn complete(&self, key: &IdempotencyKey, claimant: Option<&str>, response: CachedResponse) {
        if !self.config.enabled {
            return;
        }
        if !response.is_cacheable() {
            debug!(%key, status = response.status, "error response not cached");
            self.release(key, claimant);
            return;
        }

        let mut table = self.table.lock();
        match table.entries.get_mut(key) {
            Some(entry) if is_claimed_by(&*entry, claimant) => {
                if let Entry::InFlight { hash, created_ms } = entry {
                    let completed = Entry::Complete {
                        hash: std::mem::take(hash),
                        created_ms: *created_ms,
                        response,
                    };
                    *entry = completed;
                    debug!(%key, "response recorded");
                }
            }
            Some(_) => warn!(%key, "response dropped, key no longer held by this request"),
            None => warn!(%key, "response recorded for unknown or evicted key"),
        }
        drop(table);
        self.settled.notify_all();
    }

    fn release(&self, key: &IdempotencyKey, claimant: Option<&str>) {
        let mut table = self.table.lock();
        if table.entries.get(key).is_some_and(|entry| is_claimed_by(entry, claimant)) {
            table.entries.remove(key);
            debug!(%key, "in-flight claim released");
        }
        drop(table);
        self.settled.notify_all();
    }

    /// Drop every expired entry, at most once per [`PRUNE_INTERVAL_MS`].
    fn prune(&self, table: &mut Table) {
        let now_ms = self.clock.now_ms();
        if now_ms.saturating_sub(table.pruned_ms) < PRUNE_INTERVAL_MS {
            return;
        }
        table.pruned_ms = now_ms;
        let before = table.entries.len();
        table.entries.retain(|_, entry| !self.is_expired(entry, now_ms));
        let pruned = before - table.entries.len();
        if pruned > 0 {
            debug!(pruned, "expired idempotency entries pruned");
        }
    }

    fn is_expired(&self, entry: &Entry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.created_ms()) > self.config.allowed_duration_ms()
    }
}

/// An in-flight entry, made by the payload hashed to `claimant` when given.
fn is_claimed_by(entry: &Entry, claimant: Option<&str>) -> bool {
    matches!(entry, Entry::InFlight { .. }) && claimant.map_or(true, |hash| entry.hash() == hash)
}

/// Outcome of [`IdempotencyCache::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The handler ran.
    Fresh(CachedResponse),
    /// A previous run's response was replayed.
    Replayed(CachedResponse),
}

impl Execution {
    pub fn response(&self) -> &CachedResponse {
        match self {
            Execution::Fresh(response) | Execution::Replayed(response) => response,
        }
    }

    pub fn into_response(self) -> CachedResponse {
        match self {
            Execution::Fresh(response) | Execution::Replayed(response) => response,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Execution::Replayed(_))
    }
}

/// Releases the key if dropped before a response is recorded.
///
/// Carries the payload hash so a request whose entry was evicted and
/// reclaimed by a newer one leaves the newer claim alone.
struct Claim<'a> {
    cache: &'a IdempotencyCache,
    key: &'a IdempotencyKey,
    hash: String,
    settled: bool,
}

impl Claim<'_> {
    fn complete(mut self, response: CachedResponse) {
        self.settled = true;
        self.cache.complete(self.key, Some(self.hash.as_str()), response);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.release(self.key, Some(self.hash.as_str()));
        }
    }
}

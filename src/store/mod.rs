// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Key/value store backends for the fragment cache
//!
//! This module defines the narrow persistence boundary the rest of the crate
//! talks to, and ships three backends:
//!
//! - [`DiskStore`]: persistent JSON file with cross-process file locking
//! - [`MemoryStore`]: in-process map with optional size limit
//! - [`NoOpStore`]: stores nothing (every read misses)
//!
//! # Examples
//!
//! ```rust,ignore
//! use fragcache::{CachedFetch, CacheConfig, DiskStore, MemoryStore};
//! use std::sync::Arc;
//!
//! // Shared between processes on the same host
//! let store = DiskStore::new("/var/cache/fragcache/store.json").validate()?;
//! let cache = CachedFetch::new(Arc::new(store), CacheConfig::default())?;
//!
//! // Process-local
//! let cache = CachedFetch::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::StoreError;

mod disk;
mod entry;
mod memory;
mod noop;
pub mod types;

pub use disk::DiskStore;
pub use entry::{CacheEntry, OwnerToken, PendingRequestMarker, StoredValue, Version};
pub use memory::MemoryStore;
pub use noop::NoOpStore;

use types::{TimestampMillis, WriteSequence};

/// Statistics about store usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that found a live record
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Records removed to respect a size limit
    pub evictions: u64,
    /// Records dropped because their expiry elapsed
    pub expirations: u64,
    /// Current number of records
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={}, misses={}, evictions={}, expirations={}, entries={}, hit_rate={:.1}%",
            self.hits,
            self.misses,
            self.evictions,
            self.expirations,
            self.entries,
            self.hit_rate()
        )
    }
}

/// Operations available inside [`CacheStore::transact`]
///
/// Reads observe the writes made earlier in the same scope. Nothing is
/// visible to other callers until the scope returns `Ok`.
pub trait StoreTxn {
    fn get(&self, key: &str) -> Option<StoredValue>;

    fn set(&mut self, key: &str, value: StoredValue, expire: Option<Duration>);

    fn delete(&mut self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Closure run by [`CacheStore::transact`]
pub type TxnScope<'a> = Box<dyn FnOnce(&mut dyn StoreTxn) -> Result<(), StoreError> + Send + 'a>;

/// Guard returned by [`CacheStore::lock`]; the lock is held until drop
pub struct KeyLockGuard {
    _held: Box<dyn Send>,
}

impl KeyLockGuard {
    /// Wraps whatever keeps a backend's lock alive
    pub fn new(held: impl Send + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl fmt::Debug for KeyLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLockGuard").finish_non_exhaustive()
    }
}

/// Persistence boundary of the cache
///
/// Backends hold no business logic: they store opaque [`StoredValue`]s under
/// opaque string keys and provide two kinds of mutual exclusion, an atomic
/// [`transact`](Self::transact) scope and a per-key [`lock`](Self::lock).
///
/// # Error Handling
///
/// Unlike a best-effort cache, store failures are surfaced to the caller. The
/// fragment cache assumes the store is reliable within a call.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads `key`; expired records read as absent
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Writes `key`, optionally expiring after `expire`
    async fn set(
        &self,
        key: &str,
        value: StoredValue,
        expire: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Removes `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Runs `scope` as one atomic unit against the store
    async fn transact<'a>(&self, scope: TxnScope<'a>) -> Result<(), StoreError>;

    /// Blocks until the mutual-exclusion lock named `key` is held
    ///
    /// Lock names live in their own namespace; they never collide with keys
    /// holding values.
    async fn lock(&self, key: &str) -> Result<KeyLockGuard, StoreError>;

    /// Every live key
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Removes every record
    async fn clear(&self) -> Result<(), StoreError>;

    async fn stats(&self) -> CacheStats;

    /// Human-readable backend name for logs
    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs `scope` in a [`CacheStore::transact`] and returns its result
pub async fn transact_with<S, T, F>(store: &S, scope: F) -> Result<T, StoreError>
where
    S: CacheStore + ?Sized,
    T: Send,
    F: FnOnce(&mut dyn StoreTxn) -> Result<T, StoreError> + Send,
{
    let mut output = None;
    let slot = &mut output;
    store
        .transact(Box::new(move |txn: &mut dyn StoreTxn| {
            *slot = Some(scope(txn)?);
            Ok(())
        }))
        .await?;
    output.ok_or_else(|| StoreError::backend("transaction scope did not run"))
}

/// A value as laid out inside a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreRecord {
    value: StoredValue,
    written_at: TimestampMillis,
    #[serde(default)]
    seq: WriteSequence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expire_ms: Option<u64>,
}

impl StoreRecord {
    pub(crate) fn new(value: StoredValue, expire: Option<Duration>, seq: WriteSequence) -> Self {
        Self {
            value,
            written_at: TimestampMillis::now(),
            seq,
            expire_ms: expire.map(|e| u64::try_from(e.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.expire_ms
            .is_some_and(|ms| self.written_at.is_older_than(Duration::from_millis(ms)))
    }

    pub(crate) fn value(&self) -> &StoredValue {
        &self.value
    }

    /// Eviction order: oldest write first
    pub(crate) fn age_key(&self) -> (TimestampMillis, WriteSequence) {
        (self.written_at, self.seq)
    }
}

/// Copy-on-write view over a backend's records used by `transact`
///
/// Writes are staged and applied by [`commit`](Self::commit) only when the
/// scope succeeds.
pub(crate) struct StagedTxn<'a> {
    base: &'a HashMap<String, StoreRecord>,
    staged: HashMap<String, Option<StoreRecord>>,
    next_seq: WriteSequence,
}

impl<'a> StagedTxn<'a> {
    pub(crate) fn new(base: &'a HashMap<String, StoreRecord>, next_seq: WriteSequence) -> Self {
        Self {
            base,
            staged: HashMap::new(),
            next_seq,
        }
    }

    fn record(&self, key: &str) -> Option<&StoreRecord> {
        match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(key),
        }
    }

    /// Staged writes plus the sequence counter to continue from
    pub(crate) fn into_changes(self) -> (HashMap<String, Option<StoreRecord>>, WriteSequence) {
        (self.staged, self.next_seq)
    }

    /// Applies staged writes to `records`
    pub(crate) fn commit(
        changes: HashMap<String, Option<StoreRecord>>,
        records: &mut HashMap<String, StoreRecord>,
    ) {
        for (key, change) in changes {
            match change {
                Some(record) => {
                    records.insert(key, record);
                }
                None => {
                    records.remove(&key);
                }
            }
        }
    }
}

impl StoreTxn for StagedTxn<'_> {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.record(key)
            .filter(|record| !record.is_expired())
            .map(|record| record.value.clone())
    }

    fn set(&mut self, key: &str, value: StoredValue, expire: Option<Duration>) {
        let record = StoreRecord::new(value, expire, self.next_seq);
        self.next_seq = self.next_seq.next();
        self.staged.insert(key.to_string(), Some(record));
    }

    fn delete(&mut self, key: &str) -> bool {
        let existed = self.record(key).is_some_and(|r| !r.is_expired());
        self.staged.insert(key.to_string(), None);
        existed
    }
}

/// In-process async mutexes keyed by name
///
/// Entries nobody holds are pruned on each acquisition, so the map only grows
/// with the number of concurrently held locks.
#[derive(Debug, Default)]
pub(crate) struct KeyedMutexes {
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedMutexes {
    pub(crate) async fn lock(
        &self,
        key: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, StoreError> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| StoreError::backend("keyed lock table poisoned"))?;
            locks.retain(|name, m| name == key || Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        Ok(mutex.lock_owned().await)
    }
}

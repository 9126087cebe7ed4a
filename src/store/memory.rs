// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory store with optional size limit

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    types::WriteSequence, CacheStats, CacheStore, KeyLockGuard, KeyedMutexes, StagedTxn,
    StoreRecord, StoredValue, TxnScope,
};
use crate::errors::StoreError;

#[derive(Debug, Default)]
struct MemoryStoreState {
    records: HashMap<String, StoreRecord>,
    stats: CacheStats,
    next_seq: WriteSequence,
}

impl MemoryStoreState {
    /// Drops `key` if its expiry elapsed, returning the live record otherwise
    fn live(&mut self, key: &str) -> Option<&StoreRecord> {
        if self.records.get(key).is_some_and(StoreRecord::is_expired) {
            debug!(key = %key, "Store record expired");
            self.records.remove(key);
            self.stats.expirations += 1;
        }
        self.records.get(key)
    }

    fn evict_oldest(&mut self, max_entries: usize) {
        while self.records.len() > max_entries {
            let oldest = self
                .records
                .iter()
                .min_by_key(|(_, record)| record.age_key())
                .map(|(key, _)| key.clone());
            let Some(key) = oldest else { break };
            debug!(key = %key, "Evicting oldest store record");
            self.records.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

/// In-memory store shared by the tasks of one process
///
/// Everything lives in a `HashMap` behind an async mutex. When a size limit is
/// set, the oldest written records are evicted first.
///
/// # Examples
///
/// ```rust,ignore
/// use fragcache::MemoryStore;
///
/// let store = MemoryStore::new().with_max_entries(10_000);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    max_entries: Option<usize>,
    state: Mutex<MemoryStoreState>,
    locks: KeyedMutexes,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of records; the oldest are evicted beyond it
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut state = self.state.lock().await;
        let value = state.live(key).map(|record| record.value().clone());
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: StoredValue,
        expire: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq = seq.next();
        state
            .records
            .insert(key.to_string(), StoreRecord::new(value, expire, seq));
        if let Some(max_entries) = self.max_entries {
            state.evict_oldest(max_entries);
        }
        state.stats.entries = state.records.len();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let existed = state.live(key).is_some();
        state.records.remove(key);
        state.stats.entries = state.records.len();
        Ok(existed)
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.live(key).is_some())
    }

    async fn transact<'a>(&self, scope: TxnScope<'a>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let (changes, next_seq) = {
            let mut txn = StagedTxn::new(&state.records, state.next_seq);
            scope(&mut txn)?;
            txn.into_changes()
        };
        StagedTxn::commit(changes, &mut state.records);
        state.next_seq = next_seq;
        if let Some(max_entries) = self.max_entries {
            state.evict_oldest(max_entries);
        }
        state.stats.entries = state.records.len();
        Ok(())
    }

    async fn lock(&self, key: &str) -> Result<KeyLockGuard, StoreError> {
        let guard = self.locks.lock(key).await?;
        Ok(KeyLockGuard::new(guard))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|(_, record)| !record.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        debug!(entries = state.records.len(), "Clearing memory store");
        state.records.clear();
        state.stats.entries = 0;
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats.clone()
    }

    fn name(&self) -> &'static str {
        "MemoryStore"
    }
}

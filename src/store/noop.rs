// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Store that keeps nothing

use async_trait::async_trait;
use std::time::Duration;

use super::{CacheStats, CacheStore, KeyLockGuard, StagedTxn, StoredValue, TxnScope};
use crate::errors::StoreError;

/// A store that never retains a value
///
/// Every read misses and writes are discarded, so every request reaches the
/// fetch collaborator. Locks are uncontended. Useful for tests and for
/// deployments that want the fragment planning and merge behaviour without
/// persistence.
///
/// # Examples
///
/// ```rust,ignore
/// use fragcache::{CachedFetch, CacheConfig, NoOpStore};
/// use std::sync::Arc;
///
/// let cache = CachedFetch::new(Arc::new(NoOpStore), CacheConfig::default())?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStore;

#[async_trait]
impl CacheStore for NoOpStore {
    async fn get(&self, _key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _value: StoredValue,
        _expire: Option<Duration>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn transact<'a>(&self, scope: TxnScope<'a>) -> Result<(), StoreError> {
        // The scope still runs so callers get their result; its writes are dropped
        let empty = Default::default();
        let mut txn = StagedTxn::new(&empty, Default::default());
        scope(&mut txn)
    }

    async fn lock(&self, _key: &str) -> Result<KeyLockGuard, StoreError> {
        Ok(KeyLockGuard::new(()))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn name(&self) -> &'static str {
        "NoOpStore"
    }
}

// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Per-fragment cache over a [`CacheStore`]
//!
//! Two freshness policies share one key layout:
//!
//! - **Versioned**: a fragment is fresh when its stored version satisfies the
//!   version the provider currently reports.
//! - **Unversioned**: a fragment is fresh for a retention window after it was
//!   written; older fragments are revalidated upstream and either replaced or
//!   touched.

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::planner::fragment_span;
use crate::errors::{CacheError, StoreError};
use crate::series::TimeSeries;
use crate::store::{transact_with, CacheEntry, CacheStore, StoredValue, Version};

/// Result of a versioned fragment lookup
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedLookup<S> {
    /// Cached with a version satisfying the requested one
    Hit(S),
    /// Cached, but with an older (or incomparable) version
    Stale(S),
    Miss,
}

impl<S> VersionedLookup<S> {
    /// The cached series, fresh or not
    pub fn into_cached(self) -> Option<S> {
        match self {
            VersionedLookup::Hit(series) | VersionedLookup::Stale(series) => Some(series),
            VersionedLookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, VersionedLookup::Hit(_))
    }
}

/// Cached fragment older than the retention window
#[derive(Debug, Clone, PartialEq)]
pub struct OutdatedFragment<S> {
    pub fragment: DateTime<Utc>,
    pub series: S,
    pub created: DateTime<Utc>,
}

/// Unversioned fragments split by freshness
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<S> {
    /// Not cached at all (or unreadable)
    pub missing: Vec<DateTime<Utc>>,
    /// Cached and younger than the retention window
    pub fresh: Vec<(DateTime<Utc>, S)>,
    /// Cached but due for revalidation
    pub outdated: Vec<OutdatedFragment<S>>,
}

impl<S> Default for Classified<S> {
    fn default() -> Self {
        Self {
            missing: Vec::new(),
            fresh: Vec::new(),
            outdated: Vec::new(),
        }
    }
}

impl<S> Classified<S> {
    /// True when nothing needs to be fetched
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.outdated.is_empty()
    }
}

/// Fragment-level view over a shared [`CacheStore`]
///
/// Keys are `"{prefix}/{product}/{fragment_start}"` with the fragment start in
/// RFC 3339, so entries written by one process are found by every other
/// process configured with the same prefix and fragment size.
#[derive(Debug, Clone)]
pub struct FragmentCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl FragmentCache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Store key of `product`'s fragment starting at `fragment`
    pub fn key(&self, product: &str, fragment: DateTime<Utc>) -> String {
        format!("{}/{}/{}", self.prefix, product, fragment.to_rfc3339())
    }

    /// Looks up versioned fragments, one result per requested fragment
    pub async fn get_from_cache<S: TimeSeries>(
        &self,
        fragments: &[DateTime<Utc>],
        product: &str,
        version: &Version,
    ) -> Result<Vec<VersionedLookup<S>>, CacheError> {
        let entries = self.read_entries(fragments, product).await?;

        let lookups = fragments
            .iter()
            .zip(entries)
            .map(|(&fragment, entry)| {
                let Some(entry) = entry else {
                    return VersionedLookup::Miss;
                };
                let fresh = entry.version().satisfies(version);
                match self.decode::<S>(product, fragment, entry) {
                    Some(series) if fresh => VersionedLookup::Hit(series),
                    Some(series) => VersionedLookup::Stale(series),
                    None => VersionedLookup::Miss,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            product = %product,
            requested = fragments.len(),
            hits = lookups.iter().filter(|l| l.is_hit()).count(),
            "Versioned fragment lookup"
        );
        Ok(lookups)
    }

    /// Writes `series` sliced per fragment, in one store transaction
    ///
    /// Every listed fragment gets an entry, including fragments where the
    /// series holds no samples: an empty fragment is a valid cached answer.
    pub async fn add_to_cache<S: TimeSeries>(
        &self,
        series: &S,
        fragments: &[DateTime<Utc>],
        fragment_duration: TimeDelta,
        product: &str,
        version: Version,
        lifetime: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut writes = Vec::with_capacity(fragments.len());
        for &fragment in fragments {
            let span = fragment_span(fragment, fragment_duration)?;
            let data = serde_json::to_value(series.slice_time(&span)).map_err(|e| {
                StoreError::serialization(format!("encoding fragment {fragment} of {product}"), e)
            })?;
            let entry = CacheEntry::new(data, version.clone(), lifetime);
            writes.push((self.key(product, fragment), StoredValue::from(entry)));
        }

        let count = writes.len();
        transact_with(self.store.as_ref(), move |txn| {
            for (key, value) in writes {
                txn.set(&key, value, lifetime);
            }
            Ok(())
        })
        .await?;

        debug!(product = %product, fragments = count, version = %version, "Stored fragments");
        Ok(())
    }

    /// Splits unversioned fragments into missing, fresh and outdated
    ///
    /// A fragment is fresh while `now - created < retention`.
    pub async fn classify<S: TimeSeries>(
        &self,
        fragments: &[DateTime<Utc>],
        product: &str,
        retention: Duration,
    ) -> Result<Classified<S>, CacheError> {
        let entries = self.read_entries(fragments, product).await?;
        let mut classified = Classified::default();

        for (&fragment, entry) in fragments.iter().zip(entries) {
            let Some(entry) = entry else {
                classified.missing.push(fragment);
                continue;
            };
            let created = entry.created();
            let fresh = entry.age() < retention;
            match self.decode::<S>(product, fragment, entry) {
                Some(series) if fresh => classified.fresh.push((fragment, series)),
                Some(series) => classified.outdated.push(OutdatedFragment {
                    fragment,
                    series,
                    created,
                }),
                None => classified.missing.push(fragment),
            }
        }

        debug!(
            product = %product,
            missing = classified.missing.len(),
            fresh = classified.fresh.len(),
            outdated = classified.outdated.len(),
            "Classified unversioned fragments"
        );
        Ok(classified)
    }

    /// Rewrites the listed fragments with `created = now`, keeping their data
    ///
    /// Used after an upstream revalidation reported no newer data. Fragments
    /// that vanished in the meantime are skipped. Returns how many were touched.
    pub async fn touch(
        &self,
        fragments: &[DateTime<Utc>],
        product: &str,
    ) -> Result<usize, CacheError> {
        let keys: Vec<String> = fragments.iter().map(|&f| self.key(product, f)).collect();

        let touched = transact_with(self.store.as_ref(), move |txn| {
            let mut touched = 0;
            for key in &keys {
                let Some(StoredValue::Entry(entry)) = txn.get(key) else {
                    continue;
                };
                let refreshed = entry.touch();
                let lifetime = refreshed.lifetime();
                txn.set(key, refreshed.into(), lifetime);
                touched += 1;
            }
            Ok(touched)
        })
        .await?;

        debug!(product = %product, touched, "Revalidated fragments kept");
        Ok(touched)
    }

    /// Removes one fragment, returning whether it was cached
    pub async fn drop(&self, product: &str, fragment: DateTime<Utc>) -> Result<bool, CacheError> {
        Ok(self.store.delete(&self.key(product, fragment)).await?)
    }

    /// Removes every fragment under this prefix whose key matches `pattern`
    ///
    /// Returns the number of removed entries.
    pub async fn drop_matching_entries(&self, pattern: &Regex) -> Result<usize, CacheError> {
        let doomed: Vec<String> = self
            .entries()
            .await?
            .into_iter()
            .filter(|key| pattern.is_match(key))
            .collect();

        let removed = transact_with(self.store.as_ref(), move |txn| {
            Ok(doomed.iter().filter(|key| txn.delete(key)).count())
        })
        .await?;

        debug!(pattern = %pattern, removed, "Dropped matching fragments");
        Ok(removed)
    }

    /// Keys of every cached fragment under this prefix, sorted
    pub async fn entries(&self) -> Result<Vec<String>, CacheError> {
        let scope = format!("{}/", self.prefix);
        let mut keys: Vec<String> = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&scope))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Reads the entries of `fragments` from one consistent snapshot
    async fn read_entries(
        &self,
        fragments: &[DateTime<Utc>],
        product: &str,
    ) -> Result<Vec<Option<CacheEntry>>, CacheError> {
        let keys: Vec<String> = fragments.iter().map(|&f| self.key(product, f)).collect();

        let entries = transact_with(self.store.as_ref(), move |txn| {
            Ok(keys
                .iter()
                .map(|key| txn.get(key).and_then(StoredValue::into_entry))
                .collect::<Vec<_>>())
        })
        .await?;

        Ok(entries
            .into_iter()
            .map(|entry| entry.filter(|e| !e.is_expired()))
            .collect())
    }

    fn decode<S: TimeSeries>(
        &self,
        product: &str,
        fragment: DateTime<Utc>,
        entry: CacheEntry,
    ) -> Option<S> {
        match serde_json::from_value(entry.into_data()) {
            Ok(series) => Some(series),
            Err(e) => {
                warn!(
                    product = %product,
                    fragment = %fragment,
                    error = %e,
                    "Unreadable cached fragment, treating as missing"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Series;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn hourly(from: u32, to: u32) -> Series {
        let time: Vec<_> = (from..to).map(at).collect();
        let values = (from..to).map(|h| vec![f64::from(h)]).collect();
        Series::new(time, values, vec!["v".to_string()]).unwrap()
    }

    fn cache() -> FragmentCache {
        FragmentCache::new(Arc::new(MemoryStore::new()), "test")
    }

    #[test]
    fn key_layout() {
        assert_eq!(
            cache().key("amda/imf", at(12)),
            "test/amda/imf/2024-03-01T12:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn versioned_hit_stale_and_miss() {
        let cache = cache();
        let series = hourly(0, 4);
        cache
            .add_to_cache(&series, &[at(0), at(2)], TimeDelta::hours(2), "p", Version::Int(2), None)
            .await
            .unwrap();

        let lookups = cache
            .get_from_cache::<Series>(&[at(0), at(2), at(4)], "p", &Version::Int(2))
            .await
            .unwrap();
        assert_eq!(lookups[0], VersionedLookup::Hit(hourly(0, 2)));
        assert_eq!(lookups[1], VersionedLookup::Hit(hourly(2, 4)));
        assert_eq!(lookups[2], VersionedLookup::Miss);

        let newer = cache
            .get_from_cache::<Series>(&[at(0)], "p", &Version::Int(3))
            .await
            .unwrap();
        assert_eq!(newer[0], VersionedLookup::Stale(hourly(0, 2)));
    }

    #[tokio::test]
    async fn empty_fragments_are_cached() {
        let cache = cache();
        cache
            .add_to_cache(&hourly(0, 1), &[at(0), at(6)], TimeDelta::hours(6), "p", Version::Int(1), None)
            .await
            .unwrap();

        let lookups = cache
            .get_from_cache::<Series>(&[at(6)], "p", &Version::Int(1))
            .await
            .unwrap();
        match &lookups[0] {
            VersionedLookup::Hit(series) => assert!(series.is_empty()),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_entry_is_a_miss() {
        let cache = cache();
        let garbage = CacheEntry::new(serde_json::json!("not a series"), Version::Int(1), None);
        cache
            .store()
            .set(&cache.key("p", at(0)), garbage.into(), None)
            .await
            .unwrap();

        let lookups = cache
            .get_from_cache::<Series>(&[at(0)], "p", &Version::Int(1))
            .await
            .unwrap();
        assert_eq!(lookups[0], VersionedLookup::Miss);
    }

    #[tokio::test]
    async fn malformed_series_is_a_miss() {
        let cache = cache();
        let mismatched = serde_json::json!({
            "time": ["2024-03-01T01:00:00Z", "2024-03-01T02:00:00Z"],
            "values": [[1.0]],
            "columns": ["v"],
        });
        cache
            .store()
            .set(
                &cache.key("p", at(0)),
                CacheEntry::new(mismatched, Version::Int(1), None).into(),
                None,
            )
            .await
            .unwrap();

        let lookups = cache
            .get_from_cache::<Series>(&[at(0)], "p", &Version::Int(1))
            .await
            .unwrap();
        assert_eq!(lookups[0], VersionedLookup::Miss);

        let classified = cache
            .classify::<Series>(&[at(0)], "p", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(classified.missing, vec![at(0)]);
    }

    #[tokio::test]
    async fn classify_by_retention_and_touch() {
        let cache = cache();
        let old = Utc::now() - TimeDelta::days(30);
        let aged = CacheEntry::new(
            serde_json::to_value(hourly(0, 1)).unwrap(),
            Version::Timestamp(old),
            None,
        )
        .created_at(old);
        cache
            .store()
            .set(&cache.key("p", at(0)), aged.into(), None)
            .await
            .unwrap();
        cache
            .add_to_cache(&hourly(1, 2), &[at(1)], TimeDelta::hours(1), "p", Version::Timestamp(Utc::now()), None)
            .await
            .unwrap();

        let retention = Duration::from_secs(14 * 24 * 3600);
        let classified = cache
            .classify::<Series>(&[at(0), at(1), at(2)], "p", retention)
            .await
            .unwrap();
        assert_eq!(classified.missing, vec![at(2)]);
        assert_eq!(classified.fresh, vec![(at(1), hourly(1, 2))]);
        assert_eq!(classified.outdated.len(), 1);
        assert_eq!(classified.outdated[0].created, old);
        assert!(!classified.is_complete());

        assert_eq!(cache.touch(&[at(0), at(2)], "p").await.unwrap(), 1);
        let after = cache
            .classify::<Series>(&[at(0)], "p", retention)
            .await
            .unwrap();
        assert_eq!(after.fresh, vec![(at(0), hourly(0, 1))]);
    }

    #[tokio::test]
    async fn maintenance_operations() {
        let cache = cache();
        cache
            .add_to_cache(&hourly(0, 3), &[at(0), at(1), at(2)], TimeDelta::hours(1), "a", Version::Int(1), None)
            .await
            .unwrap();
        cache
            .add_to_cache(&hourly(0, 1), &[at(0)], TimeDelta::hours(1), "b", Version::Int(1), None)
            .await
            .unwrap();
        cache.store().set("elsewhere/a", CacheEntry::new(serde_json::json!(0), Version::Int(1), None).into(), None).await.unwrap();

        assert_eq!(cache.entries().await.unwrap().len(), 4);
        assert!(cache.drop("a", at(2)).await.unwrap());
        assert!(!cache.drop("a", at(2)).await.unwrap());

        let pattern = Regex::new(r"^test/a/").unwrap();
        assert_eq!(cache.drop_matching_entries(&pattern).await.unwrap(), 2);
        assert_eq!(cache.entries().await.unwrap(), vec![cache.key("b", at(0))]);
        assert!(cache.store().contains("elsewhere/a").await.unwrap());
    }
}

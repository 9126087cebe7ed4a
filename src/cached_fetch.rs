// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Cache-aware retrieval of time series
//!
//! [`CachedFetch`] sits between callers and a [`FetchSource`]: it plans the
//! fragments covering a request, serves what the store already holds, fetches
//! each contiguous run of missing fragments with a single upstream request,
//! writes the new fragments back and returns the merged series trimmed to the
//! requested range.

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

use crate::config::CacheConfig;
use crate::errors::CacheError;
use crate::fetch::{FetchOptions, FetchRequest, FetchSource};
use crate::fragment::{
    group_contiguous, group_span, plan, Classified, FragmentCache, FragmentPlan, OutdatedFragment,
    VersionedLookup,
};
use crate::locker::RequestLocker;
use crate::merge::merge;
use crate::series::TimeSeries;
use crate::store::{CacheStore, Version};
use crate::time_range::TimeRange;
use crate::tracing::spans;

/// How cached fragments of a product are judged fresh
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Fresh when the stored version satisfies the provider's current version
    Version(Version),
    /// Fresh for [`CacheConfig::cache_retention`] after being written, then
    /// revalidated with a conditional request
    Retention,
}

impl Freshness {
    fn policy(&self) -> &'static str {
        match self {
            Freshness::Version(_) => "versioned",
            Freshness::Retention => "unversioned",
        }
    }
}

/// Cache-aware front of a [`FetchSource`]
///
/// Holds only read-only configuration plus handles to the shared store, so a
/// single instance can serve any number of concurrent tasks.
///
/// # Examples
///
/// ```rust,ignore
/// use fragcache::{CacheConfig, CachedFetch, DiskStore, FetchOptions, Freshness, Version};
/// use std::sync::Arc;
///
/// let store = DiskStore::new(cache_dir.join("store.json")).validate()?;
/// let cache = CachedFetch::new(Arc::new(store), CacheConfig::default())?;
///
/// let series = cache
///     .fetch("cda/ace_mag", Freshness::Version(Version::Int(3)), range, &source, FetchOptions::default())
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct CachedFetch {
    cache: FragmentCache,
    locker: RequestLocker,
    config: CacheConfig,
}

impl CachedFetch {
    /// Creates the orchestrator after validating `config`
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let cache = FragmentCache::new(Arc::clone(&store), config.prefix.clone());
        let locker =
            RequestLocker::new(store, config.lock_timeout).with_poll_interval(config.poll_interval);
        Ok(Self {
            cache,
            locker,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fragment-level access for maintenance (listing, dropping entries)
    pub fn fragment_cache(&self) -> &FragmentCache {
        &self.cache
    }

    pub fn locker(&self) -> &RequestLocker {
        &self.locker
    }

    /// Returns `product` over `range`, from cache where possible
    ///
    /// `Ok(None)` means the source had no data for any missing fragment and
    /// nothing was cached. Otherwise the merged series is trimmed to `range`
    /// (and may then be empty).
    ///
    /// # Errors
    ///
    /// - [`CacheError::Fetch`] when the source fails; nothing is written for
    ///   the failed group
    /// - [`CacheError::Store`] when the store fails
    /// - [`CacheError::InvalidConfig`] when planning rejects the settings
    pub async fn fetch<S, F>(
        &self,
        product: &str,
        freshness: Freshness,
        range: TimeRange,
        source: &F,
        options: FetchOptions,
    ) -> Result<Option<S>, CacheError>
    where
        S: TimeSeries,
        F: FetchSource<S> + ?Sized,
    {
        let span = spans::cached_fetch(product, &range, freshness.policy());

        async move {
            if options.disable_cache {
                debug!(product = %product, "Cache disabled, fetching directly");
                return source
                    .fetch(FetchRequest::new(product, range))
                    .await
                    .map_err(|e| CacheError::fetch(product, e));
            }

            let plan = plan(
                &range,
                self.config.get_fragment_hours(product),
                self.config.cache_margins,
            )?;

            let chunks = match &freshness {
                Freshness::Version(version) => {
                    self.fetch_versioned(product, version, &plan, source, options)
                        .await?
                }
                Freshness::Retention => {
                    self.fetch_unversioned(product, &plan, source, options)
                        .await?
                }
            };

            Ok(merge(chunks).map(|merged| merged.slice_time(&range)))
        }
        .instrument(span)
        .await
    }

    async fn fetch_versioned<S, F>(
        &self,
        product: &str,
        version: &Version,
        plan: &FragmentPlan,
        source: &F,
        options: FetchOptions,
    ) -> Result<Vec<Option<S>>, CacheError>
    where
        S: TimeSeries,
        F: FetchSource<S> + ?Sized,
    {
        let duration = plan.fragment_duration();
        let mut chunks = Vec::with_capacity(plan.fragments().len());
        let mut missing = Vec::new();

        if options.force_refresh {
            missing.extend_from_slice(plan.fragments());
        } else {
            let lookups = self
                .cache
                .get_from_cache::<S>(plan.fragments(), product, version)
                .await?;
            for (&fragment, lookup) in plan.fragments().iter().zip(lookups) {
                match usable(lookup, options) {
                    Some(series) => chunks.push(Some(series)),
                    None => missing.push(fragment),
                }
            }
        }

        let groups = group_contiguous(&missing, duration);
        debug!(
            product = %product,
            cached = chunks.len(),
            missing = missing.len(),
            groups = groups.len(),
            "Versioned request planned"
        );

        let fetched = try_join_all(groups.iter().map(|group| {
            self.fetch_versioned_group(product, version, group, duration, source, options)
        }))
        .await?;
        chunks.extend(fetched);
        Ok(chunks)
    }

    async fn fetch_versioned_group<S, F>(
        &self,
        product: &str,
        version: &Version,
        group: &[DateTime<Utc>],
        duration: TimeDelta,
        source: &F,
        options: FetchOptions,
    ) -> Result<Option<S>, CacheError>
    where
        S: TimeSeries,
        F: FetchSource<S> + ?Sized,
    {
        let range = group_span(group, duration)?;
        let key = self.cache.key(product, range.start());
        let span = spans::fetch_group(product, range.start(), group.len());

        self.locker
            .with_lock(&key, |outcome| async move {
                if !options.force_refresh {
                    // Another caller may have filled the group while we waited
                    let lookups = self.cache.get_from_cache::<S>(group, product, version).await?;
                    let cached: Option<Vec<S>> =
                        lookups.into_iter().map(|l| usable(l, options)).collect();
                    if let Some(cached) = cached {
                        debug!(product = %product, outcome = ?outcome, "Group filled concurrently");
                        return Ok(merge(cached.into_iter().map(Some).collect()));
                    }
                }

                info!(product = %product, range = %range, version = %version, "Fetching fragments from source");
                let fetched = source
                    .fetch(FetchRequest::new(product, range))
                    .await
                    .map_err(|e| CacheError::fetch(product, e))?;

                if let Some(series) = &fetched {
                    self.cache
                        .add_to_cache(
                            series,
                            group,
                            duration,
                            product,
                            version.clone(),
                            self.config.entry_lifetime,
                        )
                        .await?;
                }
                Ok(fetched)
            })
            .instrument(span)
            .await
    }

    async fn fetch_unversioned<S, F>(
        &self,
        product: &str,
        plan: &FragmentPlan,
        source: &F,
        options: FetchOptions,
    ) -> Result<Vec<Option<S>>, CacheError>
    where
        S: TimeSeries,
        F: FetchSource<S> + ?Sized,
    {
        let duration = plan.fragment_duration();
        let classified = if options.force_refresh {
            Classified {
                missing: plan.fragments().to_vec(),
                ..Classified::default()
            }
        } else {
            self.cache
                .classify::<S>(plan.fragments(), product, self.config.cache_retention)
                .await?
        };

        let missing_groups = group_contiguous(&classified.missing, duration);
        let outdated_groups = group_outdated(classified.outdated, duration);
        debug!(
            product = %product,
            fresh = classified.fresh.len(),
            missing_groups = missing_groups.len(),
            outdated_groups = outdated_groups.len(),
            "Unversioned request planned"
        );

        let mut chunks: Vec<Option<S>> = classified
            .fresh
            .into_iter()
            .map(|(_, series)| Some(series))
            .collect();

        let fetches = try_join_all(missing_groups.iter().map(|group| {
            self.fetch_unversioned_group(product, group, duration, source, options)
        }));
        let revalidations = try_join_all(
            outdated_groups
                .into_iter()
                .map(|group| self.revalidate_group(product, group, duration, source)),
        );
        let (fetched, revalidated) = futures::try_join!(fetches, revalidations)?;

        chunks.extend(fetched);
        chunks.extend(revalidated.into_iter().flatten());
        Ok(chunks)
    }

    async fn fetch_unversioned_group<S, F>(
        &self,
        product: &str,
        group: &[DateTime<Utc>],
        duration: TimeDelta,
        source: &F,
        options: FetchOptions,
    ) -> Result<Option<S>, CacheError>
    where
        S: TimeSeries,
        F: FetchSource<S> + ?Sized,
    {
        let range = group_span(group, duration)?;
        let key = self.cache.key(product, range.start());
        let span = spans::fetch_group(product, range.start(), group.len());

        self.locker
            .with_lock(&key, |outcome| async move {
                if !options.force_refresh {
                    let recheck = self
                        .cache
                        .classify::<S>(group, product, self.config.cache_retention)
                        .await?;
                    if recheck.is_complete() {
                        debug!(product = %product, outcome = ?outcome, "Group filled concurrently");
                        return Ok(merge(
                            recheck.fresh.into_iter().map(|(_, s)| Some(s)).collect(),
                        ));
                    }
                }

                info!(product = %product, range = %range, "Fetching fragments from source");
                let fetched = source
                    .fetch(FetchRequest::new(product, range))
                    .await
                    .map_err(|e| CacheError::fetch(product, e))?;

                if let Some(series) = &fetched {
                    self.cache
                        .add_to_cache(
                            series,
                            group,
                            duration,
                            product,
                            Version::Timestamp(Utc::now()),
                            self.config.entry_lifetime,
                        )
                        .await?;
                }
                Ok(fetched)
            })
            .instrument(span)
            .await
    }

    /// Asks the source whether an outdated group changed since it was cached
    ///
    /// New data replaces the group; "not modified" keeps the cached fragments
    /// and restarts their retention window.
    async fn revalidate_group<S, F>(
        &self,
        product: &str,
        group: Vec<OutdatedFragment<S>>,
        duration: TimeDelta,
        source: &F,
    ) -> Result<Vec<Option<S>>, CacheError>
    where
        S: TimeSeries,
        F: FetchSource<S> + ?Sized,
    {
        let fragments: Vec<DateTime<Utc>> = group.iter().map(|o| o.fragment).collect();
        let range = group_span(&fragments, duration)?;
        let key = self.cache.key(product, range.start());
        let span = spans::fetch_group(product, range.start(), fragments.len());
        let fragments = &fragments;

        self.locker
            .with_lock(&key, |outcome| async move {
                let recheck = self
                    .cache
                    .classify::<S>(fragments, product, self.config.cache_retention)
                    .await?;
                if recheck.is_complete() {
                    debug!(product = %product, outcome = ?outcome, "Group revalidated concurrently");
                    return Ok(recheck.fresh.into_iter().map(|(_, s)| Some(s)).collect());
                }

                let mut request = FetchRequest::new(product, range);
                if let Some(oldest) = group.iter().map(|o| o.created).min() {
                    request = request.if_newer_than(oldest);
                }
                info!(
                    product = %product,
                    range = %range,
                    if_newer_than = ?request.if_newer_than,
                    "Revalidating outdated fragments"
                );

                match source
                    .fetch(request)
                    .await
                    .map_err(|e| CacheError::fetch(product, e))?
                {
                    Some(series) => {
                        self.cache
                            .add_to_cache(
                                &series,
                                fragments,
                                duration,
                                product,
                                Version::Timestamp(Utc::now()),
                                self.config.entry_lifetime,
                            )
                            .await?;
                        Ok(vec![Some(series)])
                    }
                    None => {
                        self.cache.touch(fragments, product).await?;
                        Ok(group.into_iter().map(|o| Some(o.series)).collect())
                    }
                }
            })
            .instrument(span)
            .await
    }
}

/// Cached series usable for this call, if any
fn usable<S>(lookup: VersionedLookup<S>, options: FetchOptions) -> Option<S> {
    match lookup {
        VersionedLookup::Hit(series) => Some(series),
        VersionedLookup::Stale(series) if options.prefer_cache => Some(series),
        VersionedLookup::Stale(_) | VersionedLookup::Miss => None,
    }
}

/// Splits time-ordered outdated fragments into contiguous runs
fn group_outdated<S>(
    outdated: Vec<OutdatedFragment<S>>,
    duration: TimeDelta,
) -> Vec<Vec<OutdatedFragment<S>>> {
    let starts: Vec<DateTime<Utc>> = outdated.iter().map(|o| o.fragment).collect();
    let mut remaining = outdated.into_iter();
    group_contiguous(&starts, duration)
        .iter()
        .map(|group| remaining.by_ref().take(group.len()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::series::Series;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, hour, 0, 0).unwrap()
    }

    /// Source returning one sample per hour of the requested range
    struct Hourly {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FetchSource<Series> for Hourly {
        async fn fetch(&self, request: FetchRequest) -> Result<Option<Series>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hours = request.range.duration().num_hours();
            let time: Vec<_> = (0..hours)
                .map(|h| request.range.start() + TimeDelta::hours(h))
                .collect();
            let values = time.iter().map(|t| vec![t.timestamp() as f64]).collect();
            Ok(Some(Series::new(time, values, vec!["t".into()])?))
        }
    }

    fn cached() -> CachedFetch {
        let config = CacheConfig {
            fragment_hours: 6,
            cache_margins: 1.0,
            ..CacheConfig::default()
        };
        CachedFetch::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let cache = cached();
        let source = Hourly { calls: AtomicUsize::new(0) };
        let range = TimeRange::new(at(1, 2), at(1, 20)).unwrap();

        let first: Series = cache
            .fetch("p", Freshness::Version(Version::Int(1)), range, &source, FetchOptions::default())
            .await
            .unwrap()
            .unwrap();
        let second: Series = cache
            .fetch("p", Freshness::Version(Version::Int(1)), range, &source, FetchOptions::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 18);
        assert_eq!(first.first_time(), Some(at(1, 2)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_the_hole_is_fetched() {
        let cache = cached();
        let source = Hourly { calls: AtomicUsize::new(0) };
        let version = || Freshness::Version(Version::Int(1));

        let left = TimeRange::new(at(1, 0), at(1, 6)).unwrap();
        let right = TimeRange::new(at(1, 18), at(2, 0)).unwrap();
        for range in [left, right] {
            let _: Option<Series> = cache
                .fetch("p", version(), range, &source, FetchOptions::default())
                .await
                .unwrap();
        }

        let whole = TimeRange::new(at(1, 0), at(2, 0)).unwrap();
        let series: Series = cache
            .fetch("p", version(), whole, &source, FetchOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.len(), 24);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn outdated_groups_follow_contiguity() {
        let outdated: Vec<_> = [0, 6, 18]
            .into_iter()
            .map(|h| OutdatedFragment {
                fragment: at(1, h),
                series: (),
                created: at(1, 0),
            })
            .collect();
        let groups = group_outdated(outdated, TimeDelta::hours(6));
        let sizes: Vec<_> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(groups[1][0].fragment, at(1, 18));
    }

    #[test]
    fn stale_fragments_usable_only_when_preferred() {
        let stale = || VersionedLookup::Stale(1);
        assert_eq!(usable(stale(), FetchOptions::default()), None);
        assert_eq!(usable(stale(), FetchOptions::default().prefer_cache()), Some(1));
        assert_eq!(usable(VersionedLookup::<i32>::Miss, FetchOptions::default().prefer_cache()), None);
    }
}

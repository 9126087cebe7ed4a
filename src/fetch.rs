// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! The upstream data collaborator and per-call options

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;

use crate::errors::FetchError;
use crate::time_range::TimeRange;

/// One upstream request issued by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Product identifier, as given to [`CachedFetch::fetch`](crate::CachedFetch::fetch)
    pub product: String,
    /// Range to retrieve; always a whole number of fragments when issued by
    /// the cache
    pub range: TimeRange,
    /// Set when revalidating: only return data if the upstream copy changed
    /// after this instant, `None` otherwise
    pub if_newer_than: Option<DateTime<Utc>>,
}

impl FetchRequest {
    pub fn new(product: impl Into<String>, range: TimeRange) -> Self {
        Self {
            product: product.into(),
            range,
            if_newer_than: None,
        }
    }

    /// Conditional request for revalidation
    pub fn if_newer_than(mut self, instant: DateTime<Utc>) -> Self {
        self.if_newer_than = Some(instant);
        self
    }
}

/// Retrieves series from the real data provider
///
/// `Ok(None)` means "no data" for a plain request, and "not modified" for a
/// conditional one. Errors are propagated to the caller untouched.
///
/// Async closures taking a [`FetchRequest`] implement this trait:
///
/// ```rust,ignore
/// let source = |request: FetchRequest| async move {
///     client.get_series(&request.product, request.range).await.map_err(Into::into)
/// };
/// cache.fetch("amda/imf", Freshness::Retention, range, &source, FetchOptions::default()).await?;
/// ```
#[async_trait]
pub trait FetchSource<S>: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<Option<S>, FetchError>;
}

#[async_trait]
impl<S, F, Fut> FetchSource<S> for F
where
    S: Send + 'static,
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<S>, FetchError>> + Send + 'static,
{
    async fn fetch(&self, request: FetchRequest) -> Result<Option<S>, FetchError> {
        (self)(request).await
    }
}

/// Per-call switches of [`CachedFetch::fetch`](crate::CachedFetch::fetch)
///
/// All default to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bypass the cache entirely; nothing is read or written
    pub disable_cache: bool,
    /// Ignore cached fragments and fetch everything, then overwrite
    pub force_refresh: bool,
    /// Serve cached fragments even when their version is outdated
    pub prefer_cache: bool,
}

impl FetchOptions {
    pub fn disable_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn prefer_cache(mut self) -> Self {
        self.prefer_cache = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Series;
    use chrono::TimeZone;

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap(),
        )
        .unwrap()
    }

    async fn call<F: FetchSource<Series>>(source: &F, request: FetchRequest) -> Result<Option<Series>, FetchError> {
        source.fetch(request).await
    }

    #[tokio::test]
    async fn closures_are_sources() {
        let source = |request: FetchRequest| async move {
            assert_eq!(request.product, "p");
            Ok::<_, FetchError>(Some(Series::default()))
        };
        let fetched = call(&source, FetchRequest::new("p", range())).await.unwrap();
        assert_eq!(fetched, Some(Series::default()));
    }

    #[tokio::test]
    async fn source_errors_pass_through() {
        let source = |_: FetchRequest| async { Err::<Option<Series>, FetchError>("upstream down".into()) };
        let err = call(&source, FetchRequest::new("p", range())).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream down");
    }

    #[test]
    fn options_builders() {
        let options = FetchOptions::default().force_refresh().prefer_cache();
        assert!(options.force_refresh && options.prefer_cache && !options.disable_cache);

        let since = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(FetchRequest::new("p", range()).if_newer_than(since).if_newer_than, Some(since));
    }
}

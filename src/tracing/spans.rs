// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Span creation helpers for fragcache operations.
//!
//! Telemetry stays out of the business logic: instead of `#[instrument]`
//! attributes, each instrumented operation has a span helper here and attaches
//! it to its future.
//!
//! Usage pattern:
//! ```rust,ignore
//! pub async fn my_operation(&self, product: &str) -> Result<T, CacheError> {
//!     let span = spans::my_operation(product);
//!     async { /* business logic */ }.instrument(span).await
//! }
//! ```

use chrono::{DateTime, Utc};
use tracing::Span;

use crate::time_range::TimeRange;

/// Create span for one cache-aware fetch.
///
/// This is the main public API entry point.
///
/// Parent: None (root span for this operation)
/// Children: fetch_group spans (one per contiguous group of missing fragments)
#[inline]
pub(crate) fn cached_fetch(product: &str, range: &TimeRange, policy: &'static str) -> Span {
    tracing::info_span!(
        "fragcache.cached_fetch",
        product = %product,
        start = %range.start(),
        stop = %range.stop(),
        policy = policy,
    )
}

/// Create span for fetching (or revalidating) one group of adjacent fragments.
///
/// Parent: cached_fetch span
/// Children: acquire_request_lock span
#[inline]
pub(crate) fn fetch_group(
    product: &str,
    first_fragment: DateTime<Utc>,
    fragments: usize,
) -> Span {
    tracing::debug_span!(
        "fragcache.fetch_group",
        product = %product,
        first_fragment = %first_fragment,
        fragments = fragments,
    )
}

/// Create span for electing the owner of a request key.
///
/// Parent: fetch_group span
/// Children: None
#[inline]
pub(crate) fn acquire_request_lock(key: &str) -> Span {
    tracing::trace_span!("fragcache.acquire_request_lock", key = %key)
}

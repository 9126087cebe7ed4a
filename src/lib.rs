// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Time-fragmented result cache for remote time series.
//!
//! Requests for a product over a time range are cut into fixed-size,
//! midnight-anchored fragments. Fragments already in the store are served
//! locally; each contiguous run of missing fragments costs one upstream
//! request, with concurrent callers (tasks or processes sharing a
//! [`DiskStore`]) coalesced onto a single fetch. The pieces are merged back
//! into one gap-free series and trimmed to the requested range.
//!
//! ```rust,ignore
//! use fragcache::{CacheConfig, CachedFetch, FetchOptions, FetchRequest, Freshness, MemoryStore};
//! use std::sync::Arc;
//!
//! let cache = CachedFetch::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
//! let source = |request: FetchRequest| async move { provider.get(request).await };
//! let series = cache
//!     .fetch("amda/imf", Freshness::Retention, range, &source, FetchOptions::default())
//!     .await?;
//! ```

mod cached_fetch;
pub mod config;
pub mod errors;
mod fetch;
pub mod fragment;
mod locker;
mod merge;
mod series;
pub mod store;
mod time_range;
mod tracing;

pub use cached_fetch::{CachedFetch, Freshness};
pub use config::{CacheConfig, CacheConfigBuilder, ProductConfig};
pub use errors::{CacheError, FetchError, StoreError};
pub use fetch::{FetchOptions, FetchRequest, FetchSource};
pub use fragment::{
    group_contiguous, plan, Classified, FragmentCache, FragmentPlan, OutdatedFragment,
    VersionedLookup,
};
pub use locker::{LockOutcome, RequestLocker, RequestPermit};
pub use merge::merge;
pub use series::{Series, TimeSeries};
pub use store::{
    transact_with, types::TimestampMillis, CacheEntry, CacheStats, CacheStore, DiskStore,
    KeyLockGuard, MemoryStore, NoOpStore, OwnerToken, PendingRequestMarker, StoreTxn, StoredValue,
    TxnScope, Version,
};
pub use time_range::TimeRange;

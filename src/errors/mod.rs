// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the fragcache library.
//!
//! The layout mirrors the crate's layering:
//!
//! - [`StoreError`] - failures of a [`CacheStore`](crate::CacheStore) backend
//!   (I/O, (de)serialization of the persisted file, lock plumbing)
//! - [`CacheError`] - the unified error returned by the fragment cache, the
//!   request locker and the [`CachedFetch`](crate::CachedFetch) orchestrator
//!
//! Store errors convert into [`CacheError`] via `From`, so `?` propagates them
//! naturally. Errors raised by a [`FetchSource`](crate::FetchSource) are carried
//! unchanged in [`CacheError::Fetch`]: the cache never retries or swallows them.
//!
//! # Examples
//!
//! ```rust,ignore
//! use fragcache::{CacheError, CachedFetch, Freshness, FetchOptions};
//!
//! match cache.fetch("amda/imf", Freshness::Retention, range, &source, FetchOptions::default()).await {
//!     Ok(Some(series)) => println!("{} samples", series.len()),
//!     Ok(None) => println!("no data"),
//!     Err(CacheError::Fetch { product, source }) => eprintln!("{product}: {source}"),
//!     Err(e) => eprintln!("cache failure: {e}"),
//! }
//! ```

mod store;

pub use store::StoreError;

/// Error type produced by [`FetchSource`](crate::FetchSource) implementations.
///
/// Kept as a boxed trait object: the cache only forwards it to the caller.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for all fragcache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A time range with `start > stop` was supplied or computed.
    #[error("Invalid time range: {reason}")]
    InvalidRange {
        /// Description of why the range is invalid
        reason: String,
    },

    /// Configuration rejected during validation (margins below 1.0, zero
    /// fragment hours, ...).
    #[error("Invalid cache configuration: {reason}")]
    InvalidConfig {
        /// Description of the offending setting
        reason: String,
    },

    /// A series violated the [`TimeSeries`](crate::TimeSeries) contract
    /// (row count mismatch, unsorted timestamps).
    #[error("Invalid series: {reason}")]
    InvalidSeries {
        /// Description of the violation
        reason: String,
    },

    /// Error from the backing store.
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Error raised by the fetch collaborator, propagated untouched.
    #[error("Fetch failed for product '{product}': {source}")]
    Fetch {
        /// Product whose fetch failed
        product: String,
        /// The collaborator's error
        #[source]
        source: FetchError,
    },
}

impl CacheError {
    /// Create an `InvalidRange` error with a reason.
    pub fn invalid_range(reason: impl Into<String>) -> Self {
        CacheError::InvalidRange {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidConfig` error with a reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        CacheError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidSeries` error with a reason.
    pub fn invalid_series(reason: impl Into<String>) -> Self {
        CacheError::InvalidSeries {
            reason: reason.into(),
        }
    }

    /// Wrap a collaborator error for `product`.
    pub fn fetch(product: impl Into<String>, source: FetchError) -> Self {
        CacheError::Fetch {
            product: product.into(),
            source,
        }
    }

    /// Returns true when the error came from the fetch collaborator.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, CacheError::Fetch { .. })
    }
}

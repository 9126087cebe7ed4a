// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Configuration for fragcache operations
//!
//! This module controls how requests are cut into fragments, how long cached
//! fragments stay fresh and how long request locks may be held.
//!
//! # Example: Using defaults
//!
//! ```rust
//! use fragcache::CacheConfig;
//!
//! // 12-hour fragments, 1.2 margins, 14-day retention
//! let config = CacheConfig::default();
//! assert_eq!(config.get_fragment_hours("amda/imf"), 12);
//! ```
//!
//! # Example: Custom configuration
//!
//! ```rust
//! use fragcache::CacheConfigBuilder;
//! use std::time::Duration;
//!
//! let config = CacheConfigBuilder::new()
//!     .prefix("speasy")
//!     .fragment_hours(24)
//!     .product_fragment_hours("cda/mms1_fpi_brst", 1) // high-rate product
//!     .cache_retention(Duration::from_secs(3600))
//!     .build()?;
//! assert_eq!(config.get_fragment_hours("cda/mms1_fpi_brst"), 1);
//! # Ok::<(), fragcache::CacheError>(())
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CacheError;

pub mod constants;

use constants::{
    DEFAULT_CACHE_MARGINS, DEFAULT_CACHE_RETENTION, DEFAULT_FRAGMENT_HOURS, DEFAULT_LOCK_TIMEOUT,
    DEFAULT_POLL_INTERVAL, DEFAULT_PREFIX,
};

/// Configuration of a [`CachedFetch`](crate::CachedFetch)
///
/// Use [`CacheConfigBuilder`] for a fluent API to construct validated
/// instances.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Key prefix shared by every fragment of this cache
    /// Default: "fragments"
    pub prefix: String,

    /// Fragment size in hours
    /// Default: 12
    pub fragment_hours: u32,

    /// Factor by which requested ranges are expanded before planning
    /// Default: 1.2
    pub cache_margins: f64,

    /// How long unversioned fragments are served without revalidation
    /// Default: 14 days
    pub cache_retention: Duration,

    /// Age after which a pending request marker is considered abandoned
    /// Default: 60 seconds
    pub lock_timeout: Duration,

    /// Interval between reads of another owner's request marker
    /// Default: 10 milliseconds
    pub poll_interval: Duration,

    /// Lifetime of written fragments; `None` keeps them until dropped
    /// Default: None
    pub entry_lifetime: Option<Duration>,

    /// Product-specific overrides
    pub product_overrides: HashMap<String, ProductConfig>,
}

/// Product-specific configuration overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductConfig {
    /// Override fragment size for this product
    pub fragment_hours: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            fragment_hours: DEFAULT_FRAGMENT_HOURS,
            cache_margins: DEFAULT_CACHE_MARGINS,
            cache_retention: DEFAULT_CACHE_RETENTION,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            entry_lifetime: None,
            product_overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Get effective fragment size for a specific product
    ///
    /// Returns the product override if set, otherwise the global default.
    /// A product must keep the same fragment size for as long as its
    /// fragments are cached.
    pub fn get_fragment_hours(&self, product: &str) -> u32 {
        self.product_overrides
            .get(product)
            .and_then(|c| c.fragment_hours)
            .unwrap_or(self.fragment_hours)
    }

    /// Set product-specific override
    pub fn set_product_override(&mut self, product: impl Into<String>, config: ProductConfig) {
        self.product_overrides.insert(product.into(), config);
    }

    /// Checks the settings that would otherwise fail on first use
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(self.cache_margins >= 1.0) {
            return Err(CacheError::invalid_config(format!(
                "cache_margins must be >= 1.0, got {}",
                self.cache_margins
            )));
        }
        if self.fragment_hours == 0 {
            return Err(CacheError::invalid_config("fragment_hours must be at least 1"));
        }
        if let Some(product) = self
            .product_overrides
            .iter()
            .find_map(|(product, c)| (c.fragment_hours == Some(0)).then_some(product))
        {
            return Err(CacheError::invalid_config(format!(
                "fragment_hours override for '{product}' must be at least 1"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(CacheError::invalid_config("poll_interval must be non-zero"));
        }
        if self.entry_lifetime.is_some_and(|lifetime| lifetime.is_zero()) {
            return Err(CacheError::invalid_config("entry_lifetime must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for [`CacheConfig`]
///
/// # Example
///
/// ```rust
/// use fragcache::CacheConfigBuilder;
/// use std::time::Duration;
///
/// let config = CacheConfigBuilder::new()
///     .cache_margins(1.5)
///     .lock_timeout(Duration::from_secs(120))
///     .build()?;
/// # Ok::<(), fragcache::CacheError>(())
/// ```
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder starting from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Set global fragment size
    pub fn fragment_hours(mut self, hours: u32) -> Self {
        self.config.fragment_hours = hours;
        self
    }

    /// Set the range expansion factor
    pub fn cache_margins(mut self, margins: f64) -> Self {
        self.config.cache_margins = margins;
        self
    }

    /// Set the freshness window of unversioned fragments
    pub fn cache_retention(mut self, retention: Duration) -> Self {
        self.config.cache_retention = retention;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Expire written fragments after `lifetime`
    pub fn entry_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.entry_lifetime = Some(lifetime);
        self
    }

    /// Add product-specific configuration
    pub fn product_config(mut self, product: impl Into<String>, config: ProductConfig) -> Self {
        self.config.set_product_override(product, config);
        self
    }

    /// Convenience: set fragment size for a specific product
    pub fn product_fragment_hours(mut self, product: impl Into<String>, hours: u32) -> Self {
        let product = product.into();
        let mut product_config = self
            .config
            .product_overrides
            .remove(&product)
            .unwrap_or_default();
        product_config.fragment_hours = Some(hours);
        self.config.set_product_override(product, product_config);
        self
    }

    /// Build and validate the final configuration
    pub fn build(self) -> Result<CacheConfig, CacheError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

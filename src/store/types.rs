// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Strong types for store record metadata
//!
//! - [`TimestampMillis`]: wall-clock write time used for record expiry and
//!   eviction ordering
//! - [`WriteSequence`]: monotonic tie-breaker for records written within the
//!   same millisecond

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
///
/// Millisecond resolution keeps expiry checks meaningful for the short-lived
/// request markers written by the locker.
///
/// # Examples
///
/// ```
/// use fragcache::TimestampMillis;
/// use std::time::Duration;
///
/// let ts = TimestampMillis::now();
/// assert!(!ts.is_older_than(Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampMillis(u128);

impl TimestampMillis {
    pub fn now() -> Self {
        Self(Self::unix_millis())
    }

    #[cfg(test)]
    pub(crate) fn from_millis(millis: u128) -> Self {
        Self(millis)
    }

    fn unix_millis() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }

    /// Time elapsed since this timestamp, zero for timestamps in the future
    pub fn age(&self) -> Duration {
        let age_millis = Self::unix_millis().saturating_sub(self.0);
        Duration::from_millis(u64::try_from(age_millis).unwrap_or(u64::MAX))
    }

    /// Returns true once more than `duration` has elapsed
    pub fn is_older_than(&self, duration: Duration) -> bool {
        self.age() > duration
    }
}

impl Default for TimestampMillis {
    fn default() -> Self {
        Self::now()
    }
}

/// Monotonic write counter
///
/// Two records written in the same millisecond are ordered by their sequence
/// number; lower is older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteSequence(u64);

impl WriteSequence {
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Half-open UTC time intervals
//!
//! [`TimeRange`] is the unit of every request handled by the cache: a product
//! is always asked for `[start, stop)`. All derived operations return new
//! values; a range is never mutated in place.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CacheError;

/// Half-open interval `[start, stop)` of UTC instants
///
/// The constructor enforces `start <= stop`. An empty range (`start == stop`)
/// is valid and contains no instant.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use fragcache::TimeRange;
///
/// let range = TimeRange::new(
///     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
///     Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
/// )?;
/// assert_eq!(range.duration(), TimeDelta::hours(24));
/// assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
/// # Ok::<(), fragcache::CacheError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a range, rejecting `start > stop`
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Self, CacheError> {
        if start > stop {
            return Err(CacheError::invalid_range(format!(
                "start {start} is after stop {stop}"
            )));
        }
        Ok(Self { start, stop })
    }

    /// Creates a range starting at `start` and lasting `duration`
    pub fn from_start(start: DateTime<Utc>, duration: TimeDelta) -> Result<Self, CacheError> {
        Self::new(start, start + duration)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.stop
    }

    pub fn duration(&self) -> TimeDelta {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    /// Midpoint of the range
    pub fn center(&self) -> DateTime<Utc> {
        self.start + self.duration() / 2
    }

    /// Returns true when `instant` lies in `[start, stop)`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.stop
    }

    /// Returns true when `other` lies entirely within this range
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }

    /// Returns true when the two ranges share at least one instant
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Overlap of the two ranges, `None` when they are disjoint
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        (start < stop).then_some(TimeRange { start, stop })
    }

    /// Moves both bounds by `delta`
    pub fn shift(&self, delta: TimeDelta) -> TimeRange {
        TimeRange {
            start: self.start + delta,
            stop: self.stop + delta,
        }
    }

    /// Zooms the range around its center
    ///
    /// A factor of `1.2` makes the range 20% longer, split evenly on both
    /// sides. Factors below zero are clamped to zero (a degenerate range at
    /// the center).
    pub fn scale(&self, factor: f64) -> TimeRange {
        let factor = factor.max(0.0);
        let half_nanos = self.duration().num_nanoseconds().unwrap_or(i64::MAX) as f64 * factor / 2.0;
        let half = TimeDelta::nanoseconds(half_nanos.round() as i64);
        let center = self.center();
        TimeRange {
            start: center - half,
            stop: center + half,
        }
    }

    /// Splits the range into consecutive chunks of at most `chunk`
    ///
    /// The last chunk is shortened to end exactly at `stop`. A non-positive
    /// `chunk` yields the range itself.
    pub fn split(&self, chunk: TimeDelta) -> Vec<TimeRange> {
        if chunk <= TimeDelta::zero() || self.is_empty() {
            return vec![*self];
        }
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.stop {
            let next = (cursor + chunk).min(self.stop);
            chunks.push(TimeRange {
                start: cursor,
                stop: next,
            });
            cursor = next;
        }
        chunks
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.stop.to_rfc3339())
    }
}

// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Time series contract used by the cache
//!
//! The cache never looks inside a series beyond the operations of
//! [`TimeSeries`]: length, timestamps, index/time slicing and concatenation.
//! Anything that can do these and round-trip through serde can be cached.
//!
//! [`Series`] is the concrete implementation shipped with the crate: rows of
//! `f64` samples indexed by UTC timestamps, plus free-form metadata.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::errors::CacheError;
use crate::time_range::TimeRange;

/// Operations the fragment cache and merge engine need from a series
///
/// Timestamps must be sorted ascending. Implementations are cloned freely:
/// the cache hands out owned copies, never shared views.
pub trait TimeSeries: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Number of samples
    fn len(&self) -> usize;

    /// Timestamp of the sample at `index`
    fn time_at(&self, index: usize) -> Option<DateTime<Utc>>;

    /// Samples in `range` (indices), keeping metadata
    fn slice(&self, range: Range<usize>) -> Self;

    /// Concatenates `parts` in order, using the first part's metadata
    ///
    /// Returns `None` when `parts` is empty. Callers guarantee the parts are
    /// already time ordered and non overlapping.
    fn concat(parts: Vec<Self>) -> Option<Self>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first_time(&self) -> Option<DateTime<Utc>> {
        self.time_at(0)
    }

    fn last_time(&self) -> Option<DateTime<Utc>> {
        self.len().checked_sub(1).and_then(|i| self.time_at(i))
    }

    /// Index of the first sample whose timestamp is `>= instant`
    ///
    /// Left-biased binary search, equivalent to numpy's `searchsorted`.
    fn search_sorted(&self, instant: DateTime<Utc>) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.time_at(mid) {
                Some(t) if t < instant => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }

    /// Samples whose timestamps lie in `[range.start, range.stop)`
    fn slice_time(&self, range: &TimeRange) -> Self {
        let lo = self.search_sorted(range.start());
        let hi = self.search_sorted(range.stop()).max(lo);
        self.slice(lo..hi)
    }
}

/// Rows of `f64` samples indexed by UTC timestamps
///
/// `values[i]` is the row sampled at `time[i]`; every row has one value per
/// entry of `columns`. Non-finite samples (`NaN`, infinities are common fill
/// values) survive persistence.
///
/// Deserialization applies the same checks as [`Series::new`], so a stored
/// payload with mismatched rows or unsorted timestamps is rejected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    time: Vec<DateTime<Utc>>,
    #[serde(serialize_with = "samples::serialize")]
    values: Vec<Vec<f64>>,
    columns: Vec<String>,
    meta: BTreeMap<String, serde_json::Value>,
}

/// Wire form of [`Series`] before validation
#[derive(Deserialize)]
struct RawSeries {
    time: Vec<DateTime<Utc>>,
    #[serde(deserialize_with = "samples::deserialize")]
    values: Vec<Vec<f64>>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    meta: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawSeries> for Series {
    type Error = CacheError;

    fn try_from(raw: RawSeries) -> Result<Self, Self::Error> {
        let mut series = Series::new(raw.time, raw.values, raw.columns)?;
        series.meta = raw.meta;
        Ok(series)
    }
}

impl Series {
    /// Creates a series, checking row count, row width and time ordering
    pub fn new(
        time: Vec<DateTime<Utc>>,
        values: Vec<Vec<f64>>,
        columns: Vec<String>,
    ) -> Result<Self, CacheError> {
        if time.len() != values.len() {
            return Err(CacheError::invalid_series(format!(
                "{} timestamps but {} rows",
                time.len(),
                values.len()
            )));
        }
        if let Some(row) = values.iter().position(|row| row.len() != columns.len()) {
            return Err(CacheError::invalid_series(format!(
                "row {row} has {} values, expected {}",
                values[row].len(),
                columns.len()
            )));
        }
        if time.windows(2).any(|w| w[0] > w[1]) {
            return Err(CacheError::invalid_series("timestamps are not sorted"));
        }
        Ok(Self {
            time,
            values,
            columns,
            meta: BTreeMap::new(),
        })
    }

    /// Empty series with the given columns and metadata
    pub fn empty_like(other: &Series) -> Self {
        Self {
            time: Vec::new(),
            values: Vec::new(),
            columns: other.columns.clone(),
            meta: other.meta.clone(),
        }
    }

    /// Attaches a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn meta(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.meta
    }

    /// Serializes the series to a JSON value
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuilds a series from [`to_json_value`](Self::to_json_value) output
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl TimeSeries for Series {
    fn len(&self) -> usize {
        self.time.len()
    }

    fn time_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.time.get(index).copied()
    }

    fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.time.len());
        let start = range.start.min(end);
        Self {
            time: self.time[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
            columns: self.columns.clone(),
            meta: self.meta.clone(),
        }
    }

    fn concat(parts: Vec<Self>) -> Option<Self> {
        let mut parts = parts.into_iter();
        let mut merged = parts.next()?;
        for part in parts {
            merged.time.extend(part.time);
            merged.values.extend(part.values);
        }
        Some(merged)
    }
}

/// Serde adapter keeping non-finite samples lossless in JSON
///
/// JSON has no NaN or infinity; those are written as the strings `"NaN"`,
/// `"inf"` and `"-inf"`.
mod samples {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Sample {
        Finite(f64),
        Special(String),
    }

    impl From<f64> for Sample {
        fn from(value: f64) -> Self {
            if value.is_nan() {
                Sample::Special("NaN".to_string())
            } else if value == f64::INFINITY {
                Sample::Special("inf".to_string())
            } else if value == f64::NEG_INFINITY {
                Sample::Special("-inf".to_string())
            } else {
                Sample::Finite(value)
            }
        }
    }

    impl Sample {
        fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
            match self {
                Sample::Finite(value) => Ok(value),
                Sample::Special(s) => match s.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(E::custom(format!("invalid sample '{other}'"))),
                },
            }
        }
    }

    pub(super) fn serialize<S>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rows: Vec<Vec<Sample>> = rows
            .iter()
            .map(|row| row.iter().copied().map(Sample::from).collect())
            .collect();
        rows.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rows: Vec<Vec<Sample>> = Vec::deserialize(deserializer)?;
        rows.into_iter()
            .map(|row| row.into_iter().map(Sample::into_f64).collect())
            .collect()
    }
}

// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Merging fragment-sized series into one continuous series

use crate::series::TimeSeries;

/// Merges possibly overlapping series into one time-ordered series.
///
/// - `None` and empty inputs are ignored; nothing left yields `None`.
/// - Inputs are ordered by first timestamp (stable for equal starts).
/// - A series whose last timestamp does not extend past its predecessor's is
///   dropped: the predecessor already covers it.
/// - When a series starts with its predecessor and extends further, the
///   predecessor is dropped instead.
/// - Where two neighbours overlap, the earlier one keeps only its samples
///   strictly before the later one's first timestamp; the last series is kept
///   whole.
///
/// The result's metadata comes from the first kept series.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use fragcache::{merge, Series, TimeSeries};
///
/// let hourly = |from: u32, to: u32| {
///     let time = (from..to).map(|h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()).collect();
///     let values = (from..to).map(|h| vec![f64::from(h)]).collect();
///     Series::new(time, values, vec!["v".into()]).unwrap()
/// };
///
/// let merged = merge(vec![Some(hourly(5, 15)), None, Some(hourly(0, 10))]).unwrap();
/// assert_eq!(merged.len(), 15);
/// ```
pub fn merge<S: TimeSeries>(series: Vec<Option<S>>) -> Option<S> {
    let mut parts: Vec<S> = series
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    parts.sort_by_key(|s| s.first_time());

    let mut kept: Vec<S> = Vec::with_capacity(parts.len());
    for part in parts {
        if let Some(previous) = kept.last() {
            if part.last_time() <= previous.last_time() {
                continue;
            }
            if part.first_time() == previous.first_time() {
                kept.pop();
            }
        }
        kept.push(part);
    }

    let mut trimmed = Vec::with_capacity(kept.len());
    let mut rest = kept.into_iter().peekable();
    while let Some(current) = rest.next() {
        match rest.peek().and_then(|next| next.first_time()) {
            Some(next_start) => {
                let keep = current.search_sorted(next_start);
                if keep == current.len() {
                    trimmed.push(current);
                } else {
                    trimmed.push(current.slice(0..keep));
                }
            }
            None => trimmed.push(current),
        }
    }

    S::concat(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Series;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    /// Hourly samples in `[from, to)`, each valued with its hour plus `tag`
    fn hourly(from: u32, to: u32, tag: f64) -> Series {
        let time = (from..to).map(at).collect();
        let values = (from..to).map(|h| vec![f64::from(h) + tag]).collect();
        Series::new(time, values, vec!["v".to_string()]).unwrap()
    }

    fn hours(series: &Series) -> Vec<DateTime<Utc>> {
        series.time().to_vec()
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(merge::<Series>(vec![]).is_none());
        assert!(merge::<Series>(vec![None, None]).is_none());
        assert!(merge(vec![Some(hourly(0, 0, 0.0))]).is_none());
    }

    #[test]
    fn overlapping_pair_keeps_earlier_prefix() {
        let merged = merge(vec![Some(hourly(0, 10, 0.0)), Some(hourly(5, 15, 0.5))]).unwrap();

        assert_eq!(hours(&merged), (0..15).map(at).collect::<Vec<_>>());
        // 0..5 from the first series, 5..15 from the second
        assert_eq!(merged.values()[4], vec![4.0]);
        assert_eq!(merged.values()[5], vec![5.5]);
    }

    #[test]
    fn dominated_series_is_dropped() {
        let merged = merge(vec![Some(hourly(0, 10, 0.0)), Some(hourly(2, 5, 0.5))]).unwrap();
        assert_eq!(merged, hourly(0, 10, 0.0));
    }

    #[test]
    fn longer_series_with_same_start_wins() {
        let merged = merge(vec![Some(hourly(0, 4, 0.5)), Some(hourly(0, 8, 0.0))]).unwrap();
        assert_eq!(merged, hourly(0, 8, 0.0));
    }

    #[test]
    fn disjoint_series_are_concatenated_in_order() {
        let merged = merge(vec![Some(hourly(6, 8, 0.0)), Some(hourly(0, 3, 0.0))]).unwrap();
        let expected: Vec<_> = [0, 1, 2, 6, 7].into_iter().map(at).collect();
        assert_eq!(hours(&merged), expected);
    }

    #[test]
    fn single_series_passes_through() {
        let series = hourly(3, 9, 0.0);
        assert_eq!(merge(vec![Some(series.clone())]), Some(series));
    }
}

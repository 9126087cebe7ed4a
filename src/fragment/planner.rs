// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Splitting requested ranges into cacheable fragments
//!
//! Fragment boundaries are anchored at UTC midnight: with 12-hour fragments a
//! day holds the fragments starting at 00:00 and 12:00. A product must always
//! be planned with the same fragment size, otherwise previously cached keys are
//! simply never looked up again.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

use crate::errors::CacheError;
use crate::time_range::TimeRange;

/// Ordered fragment starts covering a (margin-expanded) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPlan {
    fragment_hours: u32,
    fragments: Vec<DateTime<Utc>>,
}

impl FragmentPlan {
    pub fn fragment_hours(&self) -> u32 {
        self.fragment_hours
    }

    pub fn fragment_duration(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.fragment_hours))
    }

    pub fn fragments(&self) -> &[DateTime<Utc>] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Range spanned by the fragment starting at `fragment`
    pub fn span_of(&self, fragment: DateTime<Utc>) -> Result<TimeRange, CacheError> {
        fragment_span(fragment, self.fragment_duration())
    }

    /// Union of all fragment spans, `None` for an empty plan
    pub fn covered(&self) -> Option<TimeRange> {
        let first = *self.fragments.first()?;
        let last = *self.fragments.last()?;
        TimeRange::new(first, last + self.fragment_duration()).ok()
    }
}

/// Span `[fragment, fragment + duration)`
pub fn fragment_span(fragment: DateTime<Utc>, duration: TimeDelta) -> Result<TimeRange, CacheError> {
    TimeRange::from_start(fragment, duration)
}

/// Span from the first fragment of `group` to the end of its last one
pub fn group_span(group: &[DateTime<Utc>], duration: TimeDelta) -> Result<TimeRange, CacheError> {
    match (group.first(), group.last()) {
        (Some(&first), Some(&last)) => TimeRange::new(first, last + duration),
        _ => Err(CacheError::invalid_range("empty fragment group")),
    }
}

/// Plans the fragments covering `range` expanded by `margin`
///
/// The range is first zoomed around its center by `margin` (`>= 1.0`), which
/// absorbs small clock skews and keeps nearly identical requests on the same
/// fragments. The expanded start is rounded down and the expanded stop rounded
/// up to fragment boundaries counted from their day's midnight; one fragment
/// is emitted per `fragment_hours` slot in between.
///
/// # Errors
///
/// [`CacheError::InvalidConfig`] when `fragment_hours` is zero or `margin` is
/// below 1.0 (or NaN).
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use fragcache::{plan, TimeRange};
///
/// let range = TimeRange::new(
///     Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap(),
///     Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap(),
/// )?;
/// let plan = plan(&range, 12, 1.0)?;
/// assert_eq!(plan.fragments(), &[Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()]);
/// # Ok::<(), fragcache::CacheError>(())
/// ```
pub fn plan(range: &TimeRange, fragment_hours: u32, margin: f64) -> Result<FragmentPlan, CacheError> {
    if fragment_hours == 0 {
        return Err(CacheError::invalid_config("fragment_hours must be at least 1"));
    }
    if !(margin >= 1.0) {
        return Err(CacheError::invalid_config(format!(
            "cache margin must be >= 1.0, got {margin}"
        )));
    }

    let step = TimeDelta::hours(i64::from(fragment_hours));
    let expanded = range.scale(margin);
    let start = round_down(expanded.start(), step);
    let stop = round_up(expanded.stop(), step);

    let count = ceil_div(nanos(stop - start), nanos(step)).max(0);
    let fragments = (0..count)
        .map(|i| start + step * i32::try_from(i).unwrap_or(i32::MAX))
        .collect();

    Ok(FragmentPlan {
        fragment_hours,
        fragments,
    })
}

/// Groups sorted fragment starts into runs of adjacent fragments
///
/// A new group starts whenever a fragment begins more than
/// `duration * 1.01` after the previous one; the 1% slack absorbs rounding
/// at boundaries. Each group becomes a single upstream request, so the number
/// of requests is bounded by the number of holes in `fragments`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use fragcache::group_contiguous;
///
/// let h = |n| Utc.with_ymd_and_hms(2024, 1, 1, n, 0, 0).unwrap();
/// let groups = group_contiguous(&[h(0), h(1), h(2), h(5), h(6)], TimeDelta::hours(1));
/// assert_eq!(groups, vec![vec![h(0), h(1), h(2)], vec![h(5), h(6)]]);
/// ```
pub fn group_contiguous(fragments: &[DateTime<Utc>], duration: TimeDelta) -> Vec<Vec<DateTime<Utc>>> {
    let slack = TimeDelta::nanoseconds((nanos(duration) as f64 * 1.01).round() as i64);
    let mut groups: Vec<Vec<DateTime<Utc>>> = Vec::new();

    for &fragment in fragments {
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|&prev| fragment - prev <= slack) => {
                group.push(fragment);
            }
            _ => groups.push(vec![fragment]),
        }
    }

    groups
}

fn midnight(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn round_down(instant: DateTime<Utc>, step: TimeDelta) -> DateTime<Utc> {
    let day = midnight(instant);
    let slots = nanos(instant - day) / nanos(step);
    day + TimeDelta::nanoseconds(slots * nanos(step))
}

fn round_up(instant: DateTime<Utc>, step: TimeDelta) -> DateTime<Utc> {
    let day = midnight(instant);
    let slots = ceil_div(nanos(instant - day), nanos(step));
    day + TimeDelta::nanoseconds(slots * nanos(step))
}

fn nanos(delta: TimeDelta) -> i64 {
    delta.num_nanoseconds().unwrap_or(i64::MAX)
}

fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator / denominator;
    if numerator % denominator > 0 {
        quotient + 1
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, minute, 0).unwrap()
    }

    fn range(start: DateTime<Utc>, stop: DateTime<Utc>) -> TimeRange {
        TimeRange::new(start, stop).unwrap()
    }

    #[test]
    fn rounds_to_fragment_boundaries() {
        let plan = plan(&range(at(1, 3, 30), at(1, 13, 0)), 12, 1.0).unwrap();
        assert_eq!(plan.fragments(), &[at(1, 0, 0), at(1, 12, 0)]);
        assert_eq!(plan.covered(), Some(range(at(1, 0, 0), at(2, 0, 0))));
    }

    #[test]
    fn stop_on_boundary_is_not_extended() {
        let plan = plan(&range(at(1, 0, 0), at(2, 0, 0)), 12, 1.0).unwrap();
        assert_eq!(plan.fragments(), &[at(1, 0, 0), at(1, 12, 0)]);
    }

    #[test]
    fn crosses_midnight() {
        let plan = plan(&range(at(1, 22, 0), at(2, 1, 0)), 1, 1.0).unwrap();
        assert_eq!(plan.fragments().len(), 3);
        assert_eq!(plan.fragments()[0], at(1, 22, 0));
        assert_eq!(plan.fragments()[2], at(2, 0, 0));
    }

    #[test]
    fn margin_expands_before_rounding() {
        // 10:00-14:00 zoomed by 2.0 is 08:00-16:00
        let plan = plan(&range(at(1, 10, 0), at(1, 14, 0)), 4, 2.0).unwrap();
        assert_eq!(plan.fragments(), &[at(1, 8, 0), at(1, 12, 0)]);
    }

    #[test]
    fn fragment_larger_than_a_day() {
        let plan = plan(&range(at(1, 6, 0), at(1, 7, 0)), 48, 1.0).unwrap();
        assert_eq!(plan.fragments(), &[at(1, 0, 0)]);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let r = range(at(1, 0, 0), at(1, 1, 0));
        assert!(matches!(plan(&r, 0, 1.0), Err(CacheError::InvalidConfig { .. })));
        assert!(matches!(plan(&r, 1, 0.5), Err(CacheError::InvalidConfig { .. })));
        assert!(matches!(plan(&r, 1, f64::NAN), Err(CacheError::InvalidConfig { .. })));
    }

    #[test]
    fn empty_range_on_boundary_plans_nothing() {
        let plan = plan(&range(at(1, 12, 0), at(1, 12, 0)), 12, 1.0).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.covered(), None);
    }

    #[test]
    fn grouping_minimality() {
        let h = |n: u32| at(1, n, 0);
        let groups = group_contiguous(&[h(0), h(1), h(2), h(5), h(6)], TimeDelta::hours(1));
        assert_eq!(groups, vec![vec![h(0), h(1), h(2)], vec![h(5), h(6)]]);
    }

    #[test]
    fn single_fragment_hole_splits_groups() {
        let h = |n: u32| at(1, n, 0);
        let groups = group_contiguous(&[h(0), h(2)], TimeDelta::hours(1));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn group_span_covers_whole_run() {
        let h = |n: u32| at(1, n, 0);
        let span = group_span(&[h(2), h(3), h(4)], TimeDelta::hours(1)).unwrap();
        assert_eq!(span, range(h(2), h(5)));
        assert!(group_span(&[], TimeDelta::hours(1)).is_err());
    }

    #[test]
    fn grouping_empty_input() {
        assert!(group_contiguous(&[], TimeDelta::hours(1)).is_empty());
    }
}

// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Property-based tests for fragment planning, grouping and merging
//!
//! These tests use proptest to validate invariants across arbitrary ranges,
//! fragment sizes and overlapping series.

use chrono::{DateTime, TimeDelta, TimeZone, Timelike, Utc};
use fragcache::{group_contiguous, merge, plan, Series, TimeRange, TimeSeries};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

// Helper to generate ranges within a few years, up to ~20 days long
fn arb_range() -> impl Strategy<Value = TimeRange> {
    (0i64..100_000_000, 0i64..1_800_000).prop_map(|(offset, length)| {
        let start = base() + TimeDelta::seconds(offset);
        TimeRange::new(start, start + TimeDelta::seconds(length)).unwrap()
    })
}

// Fragment sizes that divide a day, and a few that do not
fn arb_fragment_hours() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(1u32),
        Just(2),
        Just(3),
        Just(6),
        Just(12),
        Just(24),
        Just(5),
        Just(48)
    ]
}

fn hourly(from: i64, to: i64, value: f64) -> Series {
    let time: Vec<_> = (from..to).map(|h| base() + TimeDelta::hours(h)).collect();
    let values = time.iter().map(|_| vec![value]).collect();
    Series::new(time, values, vec!["v".to_string()]).unwrap()
}

proptest! {
    /// Property: the planned fragments cover the margin-expanded range
    #[test]
    fn prop_fragments_cover_expanded_range(
        range in arb_range(),
        hours in arb_fragment_hours(),
        margin in 1.0f64..2.0,
    ) {
        let plan = plan(&range, hours, margin).unwrap();
        let expanded = range.scale(margin);
        let step = TimeDelta::hours(i64::from(hours));

        if !expanded.is_empty() {
            let covered = plan.covered().expect("non-empty plan");
            prop_assert!(covered.start() <= expanded.start());
            prop_assert!(covered.stop() >= expanded.stop());
        }

        // Consecutive, equally spaced fragments
        for pair in plan.fragments().windows(2) {
            prop_assert_eq!(pair[1] - pair[0], step);
        }
    }

    /// Property: every fragment starts on a boundary counted from midnight
    #[test]
    fn prop_fragments_are_midnight_anchored(
        range in arb_range(),
        hours in prop_oneof![Just(1u32), Just(2), Just(3), Just(6), Just(12), Just(24)],
    ) {
        let plan = plan(&range, hours, 1.0).unwrap();
        for fragment in plan.fragments() {
            prop_assert_eq!(fragment.minute(), 0);
            prop_assert_eq!(fragment.second(), 0);
            prop_assert_eq!(fragment.hour() % hours, 0);
        }
    }

    /// Property: no fragment lies entirely outside the expanded range
    #[test]
    fn prop_fragment_count_is_minimal(
        range in arb_range(),
        hours in prop_oneof![Just(1u32), Just(2), Just(3), Just(6), Just(12), Just(24)],
    ) {
        let plan = plan(&range, hours, 1.0).unwrap();
        for fragment in plan.fragments() {
            let span = plan.span_of(*fragment).unwrap();
            prop_assert!(span.intersects(&range), "fragment {} misses {}", span, range);
        }
    }

    /// Property: grouping preserves order and splits exactly at holes
    #[test]
    fn prop_grouping_splits_at_holes(slots in proptest::collection::btree_set(0i64..200, 0..60)) {
        let step = TimeDelta::hours(1);
        let fragments: Vec<_> = slots.iter().map(|s| base() + step * (*s as i32)).collect();
        let groups = group_contiguous(&fragments, step);

        let flattened: Vec<_> = groups.iter().flatten().copied().collect();
        prop_assert_eq!(&flattened, &fragments);

        let holes = slots
            .iter()
            .zip(slots.iter().skip(1))
            .filter(|(a, b)| **b - **a > 1)
            .count();
        let expected = if slots.is_empty() { 0 } else { holes + 1 };
        prop_assert_eq!(groups.len(), expected);

        for group in &groups {
            for pair in group.windows(2) {
                prop_assert_eq!(pair[1] - pair[0], step);
            }
        }
    }

    /// Property: merging overlapping pieces yields each covered hour once, in order
    #[test]
    fn prop_merge_is_sorted_and_gap_free(
        pieces in proptest::collection::vec((0i64..100, 1i64..30), 1..8),
    ) {
        let series: Vec<_> = pieces
            .iter()
            .enumerate()
            .map(|(i, (start, len))| Some(hourly(*start, start + len, i as f64)))
            .collect();
        let merged = merge(series).expect("non-empty input");

        prop_assert!(merged.time().windows(2).all(|w| w[0] < w[1]));

        let mut expected: Vec<_> = pieces
            .iter()
            .flat_map(|(start, len)| *start..start + len)
            .map(|h| base() + TimeDelta::hours(h))
            .collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(merged.time(), expected.as_slice());
        prop_assert_eq!(merged.len(), merged.values().len());
    }
}

#[test]
fn merge_of_overlapping_pair_matches_reference() {
    let merged = merge(vec![Some(hourly(0, 10, 0.0)), Some(hourly(5, 15, 1.0))]).unwrap();
    let expected: Vec<_> = (0..15).map(|h| base() + TimeDelta::hours(h)).collect();
    assert_eq!(merged.time(), expected.as_slice());
    assert_eq!(merged.values()[4], vec![0.0]);
    assert_eq!(merged.values()[5], vec![1.0]);
}

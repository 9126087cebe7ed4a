// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Fragment planning and the per-fragment cache
//!
//! A request range is cut into fixed-size, midnight-anchored fragments
//! ([`planner`]). Each fragment is cached independently under
//! `"{prefix}/{product}/{fragment_start}"` ([`cache`]), so overlapping
//! requests reuse whatever fragments earlier requests stored.

pub mod cache;
pub mod planner;

pub use cache::{Classified, FragmentCache, OutdatedFragment, VersionedLookup};
pub use planner::{fragment_span, group_contiguous, group_span, plan, FragmentPlan};

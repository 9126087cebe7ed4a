// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Defaults and well-known key prefixes
//!
//! This module centralizes the constants used throughout the fragcache crate.

use std::time::Duration;

/// Default key prefix for cached fragments
pub const DEFAULT_PREFIX: &str = "fragments";

/// Default fragment size in hours
pub const DEFAULT_FRAGMENT_HOURS: u32 = 12;

/// Default expansion factor applied to requested ranges before planning
///
/// Nearby requests (a plot panned by a few minutes) land on the same
/// fragments.
pub const DEFAULT_CACHE_MARGINS: f64 = 1.2;

/// Default freshness window of unversioned fragments: 14 days
pub const DEFAULT_CACHE_RETENTION: Duration = Duration::from_secs(14 * 24 * 3600);

/// Default age after which a pending request marker is considered abandoned
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between reads of a foreign request marker
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Prefix of the keys holding [`PendingRequestMarker`](crate::PendingRequestMarker)s
pub const REQUEST_LOCKER_PREFIX: &str = "request_locker::";

/// Prefix of the store locks guarding marker creation
pub const GLOBAL_LOCK_PREFIX: &str = "global_lock::";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_do_not_collide_with_fragment_keys() {
        assert!(!REQUEST_LOCKER_PREFIX.starts_with(DEFAULT_PREFIX));
        assert!(!GLOBAL_LOCK_PREFIX.starts_with(DEFAULT_PREFIX));
        assert_ne!(REQUEST_LOCKER_PREFIX, GLOBAL_LOCK_PREFIX);
    }

    #[test]
    fn margins_do_not_shrink_requests() {
        assert!(DEFAULT_CACHE_MARGINS >= 1.0);
    }
}

// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Values persisted in a [`CacheStore`](super::CacheStore)
//!
//! A key holds either a [`CacheEntry`] (a cached fragment) or a
//! [`PendingRequestMarker`] (a fetch in flight), wrapped in [`StoredValue`].

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Freshness token reported by a data provider
///
/// Versions of the same kind compare naturally. Versions of different kinds
/// are incomparable, and an incomparable cached version is never considered
/// fresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Version {
    Int(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl Version {
    /// Returns true when `self >= required`
    pub fn satisfies(&self, required: &Version) -> bool {
        matches!(
            self.partial_cmp(required),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Version::Int(a), Version::Int(b)) => Some(a.cmp(b)),
            (Version::Timestamp(a), Version::Timestamp(b)) => Some(a.cmp(b)),
            (Version::Text(a), Version::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Version::Int(value)
    }
}

impl From<DateTime<Utc>> for Version {
    fn from(value: DateTime<Utc>) -> Self {
        Version::Timestamp(value)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Version::Text(value.to_string())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Version::Text(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Int(v) => write!(f, "{v}"),
            Version::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Version::Text(v) => f.write_str(v),
        }
    }
}

/// Opaque identity of one lock acquisition
///
/// Generated per call rather than derived from a thread id, so ownership stays
/// correct when runtimes reuse threads and when processes share a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A cached fragment payload with its freshness metadata
///
/// Persisted as `{data, version, created, lifetime_seconds}` with `created` in
/// RFC 3339. Read-only once written; refreshing produces a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    data: serde_json::Value,
    version: Version,
    created: DateTime<Utc>,
    #[serde(default)]
    lifetime_seconds: Option<u64>,
}

impl CacheEntry {
    pub fn new(data: serde_json::Value, version: Version, lifetime: Option<Duration>) -> Self {
        Self {
            data,
            version,
            created: Utc::now(),
            // Whole seconds, rounded up so a short lifetime never becomes zero
            lifetime_seconds: lifetime.map(|l| l.as_secs() + u64::from(l.subsec_nanos() > 0)),
        }
    }

    /// Overrides the creation time
    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn into_data(self) -> serde_json::Value {
        self.data
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime_seconds.map(Duration::from_secs)
    }

    /// Time since the entry was created, zero if `created` is in the future
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created).to_std().unwrap_or_default()
    }

    /// `now > created + lifetime`; entries without a lifetime never expire
    pub fn is_expired(&self) -> bool {
        match self.lifetime() {
            Some(lifetime) => self.age() > lifetime,
            None => false,
        }
    }

    /// Same data and version, created now
    pub fn touch(&self) -> Self {
        Self {
            created: Utc::now(),
            ..self.clone()
        }
    }
}

/// Placeholder stored under a request key while its fetch is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequestMarker {
    owner: OwnerToken,
    started_at: DateTime<Utc>,
}

impl PendingRequestMarker {
    pub fn new(owner: OwnerToken) -> Self {
        Self::started(owner, Utc::now())
    }

    /// Marker with an explicit start time
    pub fn started(owner: OwnerToken, started_at: DateTime<Utc>) -> Self {
        Self { owner, started_at }
    }

    pub fn owner(&self) -> OwnerToken {
        self.owner
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_owned_by(&self, owner: OwnerToken) -> bool {
        self.owner == owner
    }

    /// `now - started_at >= timeout`: the holder most likely died
    pub fn is_abandoned(&self, timeout: Duration) -> bool {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        Utc::now() - self.started_at >= timeout
    }
}

/// What a store key can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredValue {
    Entry(CacheEntry),
    Pending(PendingRequestMarker),
}

impl StoredValue {
    pub fn as_entry(&self) -> Option<&CacheEntry> {
        match self {
            StoredValue::Entry(entry) => Some(entry),
            StoredValue::Pending(_) => None,
        }
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            StoredValue::Entry(entry) => Some(entry),
            StoredValue::Pending(_) => None,
        }
    }

    pub fn as_pending(&self) -> Option<&PendingRequestMarker> {
        match self {
            StoredValue::Pending(marker) => Some(marker),
            StoredValue::Entry(_) => None,
        }
    }
}

impl From<CacheEntry> for StoredValue {
    fn from(entry: CacheEntry) -> Self {
        StoredValue::Entry(entry)
    }
}

impl From<PendingRequestMarker> for StoredValue {
    fn from(marker: PendingRequestMarker) -> Self {
        StoredValue::Pending(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn version_ordering_within_kind() {
        assert!(Version::Int(3).satisfies(&Version::Int(2)));
        assert!(Version::Int(2).satisfies(&Version::Int(2)));
        assert!(!Version::Int(1).satisfies(&Version::Int(2)));

        let older = Version::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let newer = Version::from(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert!(newer.satisfies(&older));
        assert!(!older.satisfies(&newer));
    }

    #[test]
    fn versions_of_different_kinds_never_satisfy() {
        assert_eq!(Version::Int(1).partial_cmp(&Version::from("1")), None);
        assert!(!Version::Int(10).satisfies(&Version::from("1")));
    }

    #[test]
    fn entry_without_lifetime_never_expires() {
        let entry = CacheEntry::new(serde_json::json!([1]), Version::Int(1), None)
            .created_at(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap());
        assert!(!entry.is_expired());
    }

    #[test]
    fn entry_with_lifetime_expires() {
        let entry = CacheEntry::new(
            serde_json::json!([1]),
            Version::Int(1),
            Some(Duration::from_secs(60)),
        );
        assert!(!entry.is_expired());
        let aged = entry.created_at(Utc::now() - TimeDelta::seconds(120));
        assert!(aged.is_expired());
    }

    #[test]
    fn sub_second_lifetime_rounds_up() {
        let entry = CacheEntry::new(
            serde_json::json!([1]),
            Version::Int(1),
            Some(Duration::from_millis(500)),
        );
        assert_eq!(entry.lifetime(), Some(Duration::from_secs(1)));
        assert!(!entry.is_expired());

        let longer = CacheEntry::new(serde_json::json!([1]), Version::Int(1), Some(Duration::from_millis(1500)));
        assert_eq!(longer.lifetime(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn touch_refreshes_created_only() {
        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let entry = CacheEntry::new(serde_json::json!({"a": 1}), Version::Int(4), None).created_at(old);
        let touched = entry.touch();
        assert!(touched.created() > old);
        assert_eq!(touched.data(), entry.data());
        assert_eq!(touched.version(), entry.version());
    }

    #[test]
    fn marker_abandonment() {
        let owner = OwnerToken::new();
        let fresh = PendingRequestMarker::new(owner);
        assert!(!fresh.is_abandoned(Duration::from_secs(5)));

        let aged = PendingRequestMarker::started(owner, Utc::now() - TimeDelta::seconds(10));
        assert!(aged.is_abandoned(Duration::from_secs(5)));
        assert!(aged.is_owned_by(owner));
        assert!(!aged.is_owned_by(OwnerToken::new()));
    }

    #[test]
    fn persisted_entry_schema() {
        let created = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let entry = CacheEntry::new(
            serde_json::json!([1.5]),
            Version::Int(7),
            Some(Duration::from_secs(3600)),
        )
        .created_at(created);

        let json = serde_json::to_value(StoredValue::from(entry.clone())).unwrap();
        assert_eq!(json["kind"], "entry");
        assert_eq!(json["created"], "2024-02-01T12:00:00Z");
        assert_eq!(json["lifetime_seconds"], 3600);
        assert_eq!(json["version"], serde_json::json!({"kind": "int", "value": 7}));

        let back: StoredValue = serde_json::from_value(json).unwrap();
        assert_eq!(back.into_entry(), Some(entry));
    }
}

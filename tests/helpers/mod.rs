// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Test helpers for fragcache integration tests
//!
//! Provides a mock [`FetchSource`] that records every request, so tests can
//! assert how many upstream calls the cache issued and for which ranges.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use fragcache::{FetchError, FetchRequest, FetchSource, Series, TimeRange};
use std::sync::Mutex;
use std::time::Duration;

/// `2024-01-{day} {hour}:00:00 UTC`
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

pub fn range(start: DateTime<Utc>, stop: DateTime<Utc>) -> TimeRange {
    TimeRange::new(start, stop).unwrap()
}

/// One sample per `step` in `range`, every value equal to `value`
pub fn samples(range: &TimeRange, step: TimeDelta, value: f64) -> Series {
    let mut time = Vec::new();
    let mut t = range.start();
    while t < range.stop() {
        time.push(t);
        t += step;
    }
    let values = time.iter().map(|_| vec![value]).collect();
    Series::new(time, values, vec!["b".to_string()]).unwrap()
}

/// Installs a fmt subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
enum Behavior {
    Data,
    NoData,
    Fail(String),
}

/// Mock FetchSource for testing CachedFetch logic
///
/// Returns one sample per `step` over the requested range, valued with the
/// current "upstream revision" so tests can tell fresh data from cached data.
///
/// # Example
///
/// ```rust,ignore
/// let source = MockSource::new()
///     .with_delay(Duration::from_millis(50))
///     .not_modified_on_revalidation();
///
/// cache.fetch("p", Freshness::Retention, range, &source, FetchOptions::default()).await?;
/// assert_eq!(source.calls(), 1);
/// ```
pub struct MockSource {
    step: TimeDelta,
    delay: Option<Duration>,
    behavior: Mutex<Behavior>,
    revision: Mutex<f64>,
    not_modified: bool,
    requests: Mutex<Vec<FetchRequest>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// Hourly data, revision 1.0, answering immediately
    pub fn new() -> Self {
        Self {
            step: TimeDelta::hours(1),
            delay: None,
            behavior: Mutex::new(Behavior::Data),
            revision: Mutex::new(1.0),
            not_modified: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_step(mut self, step: TimeDelta) -> Self {
        self.step = step;
        self
    }

    /// Sleep before answering, widening race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer conditional requests with "not modified"
    pub fn not_modified_on_revalidation(mut self) -> Self {
        self.not_modified = true;
        self
    }

    pub fn returning_no_data(self) -> Self {
        *self.behavior.lock().unwrap() = Behavior::NoData;
        self
    }

    pub fn failing(self, message: &str) -> Self {
        self.set_failing(message);
        self
    }

    pub fn set_failing(&self, message: &str) {
        *self.behavior.lock().unwrap() = Behavior::Fail(message.to_string());
    }

    /// Simulates an upstream update: later answers carry `revision`
    pub fn set_revision(&self, revision: f64) {
        *self.revision.lock().unwrap() = revision;
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchSource<Series> for MockSource {
    async fn fetch(&self, request: FetchRequest) -> Result<Option<Series>, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Fail(message) => Err(message.into()),
            Behavior::NoData => Ok(None),
            Behavior::Data if self.not_modified && request.if_newer_than.is_some() => Ok(None),
            Behavior::Data => {
                let revision = *self.revision.lock().unwrap();
                Ok(Some(samples(&request.range, self.step, revision)))
            }
        }
    }
}

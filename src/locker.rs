// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Single-flight coordination of upstream requests
//!
//! Concurrent callers asking for the same key (tasks of one process or
//! processes sharing a [`DiskStore`](crate::DiskStore)) elect one owner. The
//! owner performs the fetch while the others wait for its
//! [`PendingRequestMarker`] to disappear and then read the cache it filled.
//!
//! A marker whose owner died is recovered after the lock timeout: waiters stop
//! waiting, and the next release clears it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn, Instrument};

use crate::config::constants::{DEFAULT_POLL_INTERVAL, GLOBAL_LOCK_PREFIX, REQUEST_LOCKER_PREFIX};
use crate::errors::CacheError;
use crate::store::{transact_with, CacheStore, OwnerToken, PendingRequestMarker, StoredValue};
use crate::tracing::spans;

/// How a [`RequestPermit`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This call wrote the marker and owns the request
    Acquired,
    /// The marker already belonged to the caller's token
    Reentrant,
    /// Another owner held the request and finished
    Waited,
    /// Another owner's marker outlived the timeout
    Abandoned,
}

impl LockOutcome {
    /// True when the caller is the request owner
    pub fn is_owner(self) -> bool {
        matches!(self, LockOutcome::Acquired | LockOutcome::Reentrant)
    }
}

/// Elects one owner per request key through markers in a [`CacheStore`]
#[derive(Debug, Clone)]
pub struct RequestLocker {
    store: Arc<dyn CacheStore>,
    timeout: Duration,
    poll_interval: Duration,
}

impl RequestLocker {
    pub fn new(store: Arc<dyn CacheStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often waiters re-read a foreign marker
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquires `key` under a fresh owner token
    pub async fn acquire(&self, key: &str) -> Result<RequestPermit, CacheError> {
        self.acquire_as(key, OwnerToken::new()).await
    }

    /// Acquires `key` on behalf of `owner`
    ///
    /// Returns once the caller owns the request, the previous owner finished,
    /// or the previous owner's marker is older than the timeout.
    pub async fn acquire_as(&self, key: &str, owner: OwnerToken) -> Result<RequestPermit, CacheError> {
        let marker_key = format!("{REQUEST_LOCKER_PREFIX}{key}");
        let span = spans::acquire_request_lock(key);

        async {
            let wrote = {
                let _guard = self.store.lock(&format!("{GLOBAL_LOCK_PREFIX}{key}")).await?;
                if self.store.contains(&marker_key).await? {
                    false
                } else {
                    let marker = PendingRequestMarker::new(owner);
                    self.store
                        .set(&marker_key, marker.into(), Some(self.timeout))
                        .await?;
                    true
                }
            };

            let outcome = self.wait_for_marker(&marker_key, owner, wrote).await?;
            debug!(key = %key, owner = %owner, outcome = ?outcome, "Request lock resolved");

            Ok(RequestPermit {
                outcome,
                release: Some(Release {
                    store: Arc::clone(&self.store),
                    marker_key,
                    owner,
                    timeout: self.timeout,
                    owns_marker: wrote,
                }),
            })
        }
        .instrument(span)
        .await
    }

    /// Runs `f` while holding `key`, releasing afterwards even when `f` fails
    ///
    /// An error from `f` takes precedence over a release error.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(LockOutcome) -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let permit = self.acquire(key).await?;
        let result = f(permit.outcome()).await;
        let released = permit.release().await;
        let value = result?;
        released?;
        Ok(value)
    }

    async fn wait_for_marker(
        &self,
        marker_key: &str,
        owner: OwnerToken,
        wrote: bool,
    ) -> Result<LockOutcome, CacheError> {
        let mut observed: Option<PendingRequestMarker> = None;

        loop {
            let marker = match self.store.get(marker_key).await? {
                Some(StoredValue::Pending(marker)) => marker,
                // The owner finished (or the key holds something unexpected)
                _ => return Ok(LockOutcome::Waited),
            };

            if marker.is_owned_by(owner) {
                return Ok(if wrote {
                    LockOutcome::Acquired
                } else {
                    LockOutcome::Reentrant
                });
            }
            if marker.is_abandoned(self.timeout) {
                warn!(
                    key = %marker_key,
                    holder = %marker.owner(),
                    started_at = %marker.started_at(),
                    "Request marker outlived its timeout, proceeding without it"
                );
                return Ok(LockOutcome::Abandoned);
            }
            match observed {
                Some(first) if first != marker => return Ok(LockOutcome::Waited),
                Some(_) => {}
                None => {
                    debug!(key = %marker_key, holder = %marker.owner(), "Waiting for in-flight request");
                    observed = Some(marker);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Proof of a resolved [`RequestLocker::acquire`]
///
/// Call [`release`](Self::release) when the guarded work is done. A permit
/// dropped without release schedules the release on the current Tokio runtime.
#[must_use = "an unreleased permit keeps other callers waiting"]
#[derive(Debug)]
pub struct RequestPermit {
    outcome: LockOutcome,
    release: Option<Release>,
}

impl RequestPermit {
    pub fn outcome(&self) -> LockOutcome {
        self.outcome
    }

    pub fn is_owner(&self) -> bool {
        self.outcome.is_owner()
    }

    /// Clears the caller's marker, and any abandoned marker left under the key
    pub async fn release(mut self) -> Result<(), CacheError> {
        match self.release.take() {
            Some(release) => release.run().await,
            None => Ok(()),
        }
    }
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = release.run().await {
                        warn!(error = %e, "Deferred request lock release failed");
                    }
                });
            }
            Err(_) => warn!(
                key = %release.marker_key,
                "Request permit dropped outside a runtime, marker left to expire"
            ),
        }
    }
}

#[derive(Debug)]
struct Release {
    store: Arc<dyn CacheStore>,
    marker_key: String,
    owner: OwnerToken,
    timeout: Duration,
    owns_marker: bool,
}

impl Release {
    async fn run(self) -> Result<(), CacheError> {
        let Release {
            store,
            marker_key,
            owner,
            timeout,
            owns_marker,
        } = self;

        let removed = transact_with(store.as_ref(), |txn| {
            let clear = match txn.get(&marker_key) {
                Some(StoredValue::Pending(marker)) => {
                    (owns_marker && marker.is_owned_by(owner)) || marker.is_abandoned(timeout)
                }
                _ => false,
            };
            Ok(clear && txn.delete(&marker_key))
        })
        .await?;

        if removed {
            debug!(key = %marker_key, owner = %owner, "Request marker cleared");
        }
        Ok(())
    }
}

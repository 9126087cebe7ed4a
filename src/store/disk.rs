// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Disk-backed store with file locking and format versioning

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    types::WriteSequence, CacheStats, CacheStore, KeyLockGuard, KeyedMutexes, StagedTxn,
    StoreRecord, StoredValue, TxnScope,
};
use crate::errors::StoreError;

/// Current on-disk format version
const STORE_FORMAT_VERSION: u32 = 1;

/// Serialized store layout (versioned)
#[derive(Debug, Serialize, Deserialize)]
struct StoreData {
    version: u32,
    #[serde(default)]
    next_seq: WriteSequence,
    records: HashMap<String, StoreRecord>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            next_seq: WriteSequence::default(),
            records: HashMap::new(),
        }
    }
}

/// Disk store shared by every process pointing at the same file
///
/// Records are kept in one JSON document:
/// - writers take an exclusive advisory lock on a sidecar `.lock` file, load
///   the document, apply their change and atomically replace it (temp file +
///   rename), so readers always see a complete document
/// - read-only transactions take the same lock but never rewrite the file
/// - [`lock`](CacheStore::lock) uses one lock file per name under a sibling
///   `.locks/` directory, which makes it effective across processes;
///   [`clear`](CacheStore::clear) prunes the ones nobody holds
/// - a document written with another format version is ignored and replaced
///   on the next write
///
/// # Examples
///
/// ```rust,ignore
/// use fragcache::DiskStore;
///
/// let store = DiskStore::new("/var/cache/fragcache/store.json").validate()?;
/// ```
#[derive(Debug)]
pub struct DiskStore {
    path: PathBuf,
    stats: Mutex<CacheStats>,
    locks: KeyedMutexes,
}

impl DiskStore {
    /// Creates a store at `path`
    ///
    /// Nothing touches the filesystem until the first operation; call
    /// [`validate`](Self::validate) to check the location immediately.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stats: Mutex::new(CacheStats::default()),
            locks: KeyedMutexes::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the parent directory if needed and checks it is writable
    pub fn validate(self) -> Result<Self, StoreError> {
        let parent = self.parent_dir();

        if !parent.exists() {
            std::fs::create_dir_all(&parent).map_err(|e| {
                StoreError::io(
                    parent.display().to_string(),
                    format!("failed to create store directory: {e}"),
                    e,
                )
            })?;
            debug!(path = %parent.display(), "Created store directory");
        }

        let probe = parent.join(".fragcache_write_test");
        std::fs::write(&probe, b"probe").map_err(|e| {
            StoreError::io(
                parent.display().to_string(),
                format!("store directory is not writable: {e}"),
                e,
            )
        })?;
        let _ = std::fs::remove_file(&probe);

        debug!(path = %self.path.display(), "Store path validated");
        Ok(self)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn data_lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn key_locks_dir(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        self.parent_dir().join(format!("{stem}.locks"))
    }

    fn key_lock_path(&self, key: &str) -> PathBuf {
        self.key_locks_dir().join(lock_file_name(key))
    }

    /// Opens `path` and blocks (off the async executor) until it is locked
    ///
    /// Lock files can be pruned by [`clear`](CacheStore::clear). When the file
    /// was unlinked while this call waited on it, the lock no longer excludes
    /// anyone and is taken again on a fresh file.
    async fn lock_file(path: PathBuf) -> Result<File, StoreError> {
        tokio::task::spawn_blocking(move || -> Result<File, StoreError> {
            loop {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::io(parent.display().to_string(), "failed to create lock directory", e)
                    })?;
                }
                let file = match OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .open(&path)
                {
                    Ok(file) => file,
                    // Directory pruned between creation and open
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(StoreError::io(
                            path.display().to_string(),
                            "failed to open lock file",
                            e,
                        ));
                    }
                };
                file.lock().map_err(|e| {
                    StoreError::io(path.display().to_string(), "failed to acquire file lock", e)
                })?;
                if is_linked(&file, &path) {
                    return Ok(file);
                }
            }
        })
        .await
        .map_err(|e| StoreError::backend(format!("lock task failed: {e}")))?
    }

    /// Removes the per-key lock files nobody holds, returning how many went
    async fn prune_key_locks(&self) -> Result<usize, StoreError> {
        let dir = self.key_locks_dir();
        tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
                Err(e) => {
                    return Err(StoreError::io(
                        dir.display().to_string(),
                        "failed to list lock directory",
                        e,
                    ));
                }
            };

            let mut removed = 0;
            for entry in entries {
                let path = entry
                    .map_err(|e| {
                        StoreError::io(dir.display().to_string(), "failed to list lock directory", e)
                    })?
                    .path();
                let Ok(file) = OpenOptions::new().write(true).open(&path) else {
                    continue;
                };
                match file.try_lock() {
                    Ok(()) => {
                        if std::fs::remove_file(&path).is_ok() {
                            removed += 1;
                        }
                    }
                    Err(TryLockError::WouldBlock) => {}
                    Err(TryLockError::Error(e)) => {
                        warn!(path = %path.display(), error = %e, "Failed to probe lock file");
                    }
                }
            }
            // Only succeeds once every lock file is gone
            let _ = std::fs::remove_dir(&dir);
            Ok(removed)
        })
        .await
        .map_err(|e| StoreError::backend(format!("lock task failed: {e}")))?
    }

    /// Loads the document; a missing file, an unreadable document or a
    /// foreign format version all read as an empty store
    async fn load(&self) -> Result<StoreData, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreData::default());
            }
            Err(e) => {
                return Err(StoreError::io(
                    self.path.display().to_string(),
                    "failed to read store file",
                    e,
                ));
            }
        };

        let data: StoreData = match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to parse store file, starting from an empty store"
                );
                return Ok(StoreData::default());
            }
        };

        if data.version != STORE_FORMAT_VERSION {
            warn!(
                path = %self.path.display(),
                stored_version = data.version,
                current_version = STORE_FORMAT_VERSION,
                "Store format version mismatch, ignoring stored records"
            );
            return Ok(StoreData::default());
        }

        Ok(data)
    }

    /// Atomically replaces the document; callers hold the data lock
    async fn save(&self, data: &StoreData) -> Result<(), StoreError> {
        let json = serde_json::to_vec(data)
            .map_err(|e| StoreError::serialization("failed to encode store file", e))?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await.map_err(|e| {
            StoreError::io(temp_path.display().to_string(), "failed to write store file", e)
        })?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| {
                StoreError::io(
                    self.path.display().to_string(),
                    format!("failed to rename {} into place", temp_path.display()),
                    e,
                )
            })?;

        debug!(path = %self.path.display(), records = data.records.len(), "Saved store file");
        Ok(())
    }

    /// Load and mutate under the exclusive data lock
    ///
    /// `mutate` returns its output and whether it changed the document; the
    /// file is only rewritten in the latter case.
    async fn update<T>(
        &self,
        mutate: impl FnOnce(&mut StoreData) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut stats = self.stats.lock().await;
        let _file_lock = Self::lock_file(self.data_lock_path()).await?;

        let mut data = self.load().await?;
        let (output, changed) = mutate(&mut data)?;
        if changed {
            self.save(&data).await?;
        }

        stats.entries = data.records.len();
        Ok(output)
    }
}

/// Whether the locked `file` is still the one reachable at `path`
#[cfg(unix)]
fn is_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(held) = file.metadata() else {
        return true;
    };
    std::fs::metadata(path)
        .is_ok_and(|current| current.dev() == held.dev() && current.ino() == held.ino())
}

#[cfg(not(unix))]
fn is_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// File name for a lock: readable prefix plus a stable hash of the full key
fn lock_file_name(key: &str) -> String {
    let readable: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(64)
        .collect();
    // FNV-1a, stable across processes and builds
    let hash = key.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    format!("{readable}-{hash:016x}.lock")
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut stats = self.stats.lock().await;
        let data = self.load().await?;

        match data.records.get(key) {
            Some(record) if record.is_expired() => {
                debug!(key = %key, "Store record expired");
                stats.expirations += 1;
                stats.misses += 1;
                Ok(None)
            }
            Some(record) => {
                stats.hits += 1;
                Ok(Some(record.value().clone()))
            }
            None => {
                stats.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: StoredValue,
        expire: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.update(|data| {
            let seq = data.next_seq;
            data.next_seq = seq.next();
            data.records
                .insert(key.to_string(), StoreRecord::new(value, expire, seq));
            Ok(((), true))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.update(|data| match data.records.remove(key) {
            Some(record) => Ok((!record.is_expired(), true)),
            None => Ok((false, false)),
        })
        .await
    }

    async fn transact<'a>(&self, scope: TxnScope<'a>) -> Result<(), StoreError> {
        self.update(|data| {
            let (changes, next_seq) = {
                let mut txn = StagedTxn::new(&data.records, data.next_seq);
                scope(&mut txn)?;
                txn.into_changes()
            };
            if changes.is_empty() {
                return Ok(((), false));
            }
            data.records.retain(|_, record| !record.is_expired());
            StagedTxn::commit(changes, &mut data.records);
            data.next_seq = next_seq;
            Ok(((), true))
        })
        .await
    }

    async fn lock(&self, key: &str) -> Result<KeyLockGuard, StoreError> {
        let local = self.locks.lock(key).await?;
        let file = Self::lock_file(self.key_lock_path(key)).await?;
        // The file lock is released before the in-process one
        Ok(KeyLockGuard::new((file, local)))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _stats = self.stats.lock().await;
        let data = self.load().await?;
        Ok(data
            .records
            .into_iter()
            .filter(|(_, record)| !record.is_expired())
            .map(|(key, _)| key)
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut stats = self.stats.lock().await;
        let _file_lock = Self::lock_file(self.data_lock_path()).await?;

        debug!(path = %self.path.display(), "Clearing disk store");
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::io(
                    self.path.display().to_string(),
                    "failed to delete store file",
                    e,
                ));
            }
        }
        stats.entries = 0;

        let pruned = self.prune_key_locks().await?;
        debug!(pruned, "Pruned unheld key lock files");
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().await;
        if let Ok(data) = self.load().await {
            stats.entries = data.records.len();
        }
        stats.clone()
    }

    fn name(&self) -> &'static str {
        "DiskStore"
    }
}

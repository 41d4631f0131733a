//! Filesystem-backed snapshot store.
//!
//! Writes go through [`SnapshotStore::persist`], which assigns a unique
//! timestamp-derived name and only returns once the bytes are on disk.
//! Reads go through [`SnapshotStore::list`]; there is no index file, the
//! directory listing is the index.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::SnapshotError;
use crate::naming::{
    decode_image_payload, is_snapshot_file, newest_first, snapshot_file_name, validate_name,
};

/// Default upper bound for a single decoded image (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Number of fresh names tried before a write is reported as failed.
const MAX_NAME_ATTEMPTS: usize = 16;

/// A stored detection image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// File name inside the snapshot directory.
    pub file_name: String,
    /// Time the file was written.
    pub stored_at: DateTime<Utc>,
}

/// Durable, bounded store of detection snapshots in a flat directory.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    max_image_bytes: usize,
    /// Last timestamp handed out; new names are strictly greater.
    last_stamp: AtomicI64,
    /// Serialises retention sweeps and clear-all. `persist` never takes it.
    sweep_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Write`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(SnapshotError::Write)?;
        Ok(Self {
            dir,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            last_stamp: AtomicI64::new(0),
            sweep_lock: Mutex::new(()),
        })
    }

    /// Sets the largest accepted decoded image size.
    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Returns the on-disk path for a validated snapshot name.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidName`] for unsafe names.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, SnapshotError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Issues a millisecond timestamp strictly greater than any issued before.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_stamp.load(Ordering::Acquire);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Decodes a base64 (optionally data-URI) image and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidPayload`] for undecodable input and
    /// [`SnapshotError::Write`] if the file cannot be written.
    pub async fn persist_encoded(&self, payload: &str) -> Result<Snapshot, SnapshotError> {
        // base64 expands 3 bytes to 4; reject oversized input before decoding it.
        if payload.len() / 4 * 3 > self.max_image_bytes + 3 {
            return Err(SnapshotError::InvalidPayload(format!(
                "image exceeds {} bytes",
                self.max_image_bytes
            )));
        }
        let bytes = decode_image_payload(payload)?;
        self.persist(&bytes).await
    }

    /// Writes raw image bytes under a fresh `snapshot-<millis>.jpg` name.
    ///
    /// The file is created with create-new semantics and synced before this
    /// returns, so a name handed back here always refers to a complete file.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidPayload`] for empty or oversized
    /// images and [`SnapshotError::Write`] on filesystem failure.
    pub async fn persist(&self, bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
        if bytes.is_empty() {
            return Err(SnapshotError::InvalidPayload("image is empty".to_string()));
        }
        if bytes.len() > self.max_image_bytes {
            return Err(SnapshotError::InvalidPayload(format!(
                "image is {} bytes (max {})",
                bytes.len(),
                self.max_image_bytes
            )));
        }

        for _ in 0..MAX_NAME_ATTEMPTS {
            let stamp = self.next_stamp();
            let file_name = snapshot_file_name(stamp);
            let path = self.dir.join(&file_name);

            match write_new_file(&path, bytes).await {
                Ok(()) => {
                    tracing::debug!(file_name = %file_name, size_bytes = bytes.len(), "snapshot written");
                    let stored_at = DateTime::from_timestamp_millis(stamp).unwrap_or_else(Utc::now);
                    return Ok(Snapshot {
                        file_name,
                        stored_at,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(file_name = %file_name, "snapshot name taken, retrying");
                }
                Err(e) => {
                    tracing::error!(file_name = %file_name, error = %e, "failed to write snapshot");
                    return Err(SnapshotError::Write(e));
                }
            }
        }

        Err(SnapshotError::Write(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "no free snapshot name",
        )))
    }

    /// Reads the directory and returns snapshot names newest first.
    async fn scan(&self) -> Result<Vec<String>, SnapshotError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(SnapshotError::Read)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(SnapshotError::Read)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_snapshot_file(&name) {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => names.push(name),
                _ => {}
            }
        }

        names.sort_by(|a, b| newest_first(a, b));
        Ok(names)
    }

    /// Lists stored snapshot names, newest first.
    ///
    /// An unreadable directory is logged and yields an empty list.
    pub async fn list(&self) -> Vec<String> {
        match self.scan().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list snapshots");
                Vec::new()
            }
        }
    }

    /// Deletes one snapshot by name.
    ///
    /// The name is validated before the filesystem is touched.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidName`] for unsafe names,
    /// [`SnapshotError::NotFound`] if the file does not exist, and
    /// [`SnapshotError::Delete`] for any other filesystem failure.
    pub async fn delete(&self, name: &str) -> Result<(), SnapshotError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file_name = %name, "deleted snapshot");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SnapshotError::NotFound(name.to_string()))
            }
            Err(e) => {
                tracing::error!(file_name = %name, error = %e, "failed to delete snapshot");
                Err(SnapshotError::Delete(e))
            }
        }
    }

    /// Deletes every stored snapshot and returns how many were removed.
    ///
    /// Individual failures are logged and skipped; the count covers only
    /// successful deletions.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Read`] if the directory cannot be listed.
    pub async fn delete_all(&self) -> Result<usize, SnapshotError> {
        let _guard = self.sweep_lock.lock().await;
        let names = self.scan().await?;
        let deleted = self.remove_each(names.iter().map(String::as_str)).await;
        tracing::info!(deleted, total = names.len(), "cleared snapshots");
        Ok(deleted)
    }

    /// Keeps the `max_count` newest snapshots and deletes the rest, oldest first.
    ///
    /// Returns the number of snapshots evicted.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Read`] if the directory cannot be listed.
    pub async fn enforce_retention(&self, max_count: usize) -> Result<usize, SnapshotError> {
        let _guard = self.sweep_lock.lock().await;
        let mut names = self.scan().await?;
        if names.len() <= max_count {
            return Ok(0);
        }

        let excess = names.split_off(max_count);
        let evicted = self.remove_each(excess.iter().rev().map(String::as_str)).await;
        if evicted < excess.len() {
            tracing::warn!(
                evicted,
                expected = excess.len(),
                "some snapshots could not be evicted"
            );
        }
        Ok(evicted)
    }

    async fn remove_each<'a>(&self, names: impl Iterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        for name in names {
            match tokio::fs::remove_file(self.dir.join(name)).await {
                Ok(()) => {
                    tracing::debug!(file_name = %name, "removed snapshot");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(file_name = %name, error = %e, "failed to remove snapshot");
                }
            }
        }
        removed
    }
}

/// Creates `path` exclusively and writes `bytes` to it, syncing before return.
async fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        // Never leave a truncated image behind under a valid name.
        let _ = tokio::fs::remove_file(path).await;
        return Err(e);
    }
    Ok(())
}

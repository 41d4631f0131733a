//! Snapshot storage for the Watchtower relay.
//!
//! Detection images arrive from camera clients as base64 JPEG frames and
//! are written into a single flat directory as `snapshot-<unixMillis>.jpg`.
//! The store owns that directory exclusively:
//!
//! - [`SnapshotStore::persist`] / [`SnapshotStore::persist_encoded`] write a
//!   new file and only return its name once the bytes are synced.
//! - [`SnapshotStore::list`] returns names newest first.
//! - [`SnapshotStore::delete`] and [`SnapshotStore::delete_all`] remove files.
//! - [`SnapshotStore::enforce_retention`] evicts the oldest files beyond a
//!   configured count.
//!
//! # Usage
//!
//! ```rust,ignore
//! use watchtower_snapshots::SnapshotStore;
//!
//! let store = SnapshotStore::open("public/recordings")?;
//! let snapshot = store.persist_encoded("data:image/jpeg;base64,/9j/4AAQ...").await?;
//! assert_eq!(store.list().await[0], snapshot.file_name);
//! ```

mod error;
mod naming;
mod store;

pub use error::SnapshotError;
pub use naming::{
    decode_image_payload, embedded_timestamp, newest_first, snapshot_file_name, validate_name,
    SNAPSHOT_EXTENSION, SNAPSHOT_PREFIX,
};
pub use store::{Snapshot, SnapshotStore, DEFAULT_MAX_IMAGE_BYTES};

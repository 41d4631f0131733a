//! Error types for snapshot storage.

/// Errors that can occur while storing or removing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The file name is unsafe (path traversal) or has the wrong extension.
    #[error("invalid snapshot name: {0}")]
    InvalidName(String),

    /// The image payload could not be decoded or is unacceptable.
    #[error("invalid image payload: {0}")]
    InvalidPayload(String),

    /// No snapshot with this name exists.
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// Writing a snapshot to disk failed.
    #[error("snapshot write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the snapshot directory failed.
    #[error("snapshot directory read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Removing a snapshot from disk failed.
    #[error("snapshot delete failed: {0}")]
    Delete(#[source] std::io::Error),
}

impl SnapshotError {
    /// Returns `true` for errors caused by caller input rather than the filesystem.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidName(_) | Self::InvalidPayload(_))
    }
}

//! Snapshot file naming, name validation, and payload decoding.
//!
//! Snapshots are stored as `snapshot-<unixMillis>.jpg`. The directory
//! listing is the only index, so ordering and retention both read the
//! timestamp back out of the file name.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::cmp::Ordering;

use crate::error::SnapshotError;

/// Prefix of every snapshot file written by the store.
pub const SNAPSHOT_PREFIX: &str = "snapshot-";

/// Extension of every snapshot file; other files in the directory are ignored.
pub const SNAPSHOT_EXTENSION: &str = ".jpg";

/// Builds the file name for a snapshot taken at `unix_millis`.
pub fn snapshot_file_name(unix_millis: i64) -> String {
    format!("{SNAPSHOT_PREFIX}{unix_millis}{SNAPSHOT_EXTENSION}")
}

/// Extracts the timestamp embedded in a snapshot file name.
///
/// Reads the digits between the first `-` and the following `.`. Names
/// that do not carry a parseable timestamp yield `0`, so they sort as the
/// oldest entries and are the first to be evicted.
pub fn embedded_timestamp(name: &str) -> i64 {
    let Some(rest) = name.split('-').nth(1) else {
        return 0;
    };
    let stem = rest.split('.').next().unwrap_or_default();
    let digits: String = stem.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Orders names newest first: by embedded timestamp, then by name, both descending.
pub fn newest_first(a: &str, b: &str) -> Ordering {
    embedded_timestamp(b)
        .cmp(&embedded_timestamp(a))
        .then_with(|| b.cmp(a))
}

/// Returns `true` if `name` looks like a file the store manages.
pub(crate) fn is_snapshot_file(name: &str) -> bool {
    name.ends_with(SNAPSHOT_EXTENSION)
}

/// Rejects names that could escape the snapshot directory or that do not
/// carry the snapshot extension.
///
/// # Errors
///
/// Returns [`SnapshotError::InvalidName`] for unsafe names.
pub fn validate_name(name: &str) -> Result<(), SnapshotError> {
    if name.is_empty() {
        return Err(SnapshotError::InvalidName("empty name".to_string()));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    if !is_snapshot_file(name) || name.len() == SNAPSHOT_EXTENSION.len() {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Decodes a base64 image, optionally prefixed with a `data:<mime>;base64,` header.
///
/// # Errors
///
/// Returns [`SnapshotError::InvalidPayload`] if the header is not a base64
/// data URI, the body is not valid base64, or the decoded image is empty.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, SnapshotError> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(uri) => {
            let (header, body) = uri.split_once(',').ok_or_else(|| {
                SnapshotError::InvalidPayload("data URI has no payload".to_string())
            })?;
            if !header.ends_with(";base64") {
                return Err(SnapshotError::InvalidPayload(format!(
                    "data URI is not base64 encoded: {header}"
                )));
            }
            body
        }
        None => payload,
    };

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SnapshotError::InvalidPayload(format!("invalid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(SnapshotError::InvalidPayload("image is empty".to_string()));
    }
    Ok(bytes)
}

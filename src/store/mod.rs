//! Object-store contract for multipart uploads.
//!
//! The coordinator only speaks this trait; the aws-sdk-s3 implementation
//! lives in [`aws`], and the integration tests drive the state machine with
//! a scripted mock. The destination `(bucket, key)` is bound when the store
//! is constructed, so the operations carry only what varies per call.

pub mod aws;

use std::io::SeekFrom;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::UploadConfig;
use crate::limiter::{RateLimiter, ThrottledReader};

/// A contiguous region `[offset, offset + length)` of the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRegion {
    pub offset: u64,
    pub length: u64,
}

/// Body handed to [`ObjectStore::upload_part`]: a throttled view over one
/// region of the local file.
pub type PartBody = ThrottledReader<tokio::io::Take<tokio::fs::File>>;

/// Open a throttled reader over one region of the file.
///
/// The caller holds the file open for the whole upload; each part clones the
/// handle. The clones share one cursor, which is fine because only one part
/// reads at a time.
pub async fn open_region(
    file: &std::fs::File,
    region: FileRegion,
    limiter: Arc<RateLimiter>,
) -> Result<PartBody> {
    let clone = file.try_clone().context("failed to clone the file handle")?;
    let mut file = tokio::fs::File::from_std(clone);
    file.seek(SeekFrom::Start(region.offset))
        .await
        .context("failed to seek to part offset")?;
    Ok(ThrottledReader::new(file.take(region.length), limiter))
}

/// Outcome of the destination existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Exists,
    Missing,
}

/// One in-progress multipart upload, as reported by the store.
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
}

/// Optional per-algorithm checksums the store may attach to a part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartChecksums {
    pub crc32: Option<String>,
    pub crc32c: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

/// One already-accepted part, as reported by `ListParts`.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub part_number: i32,
    pub size: u64,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub checksums: PartChecksums,
}

/// Receipt for a successfully uploaded part.
#[derive(Debug, Clone)]
pub struct PartReceipt {
    pub etag: String,
    pub checksums: PartChecksums,
}

/// A completed part retained for the final assembly call.
#[derive(Debug, Clone)]
pub struct PartRecord {
    /// 1-based, contiguous.
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
    pub checksums: PartChecksums,
}

/// Request envelope for one part upload.
#[derive(Debug, Clone)]
pub struct PartRequest {
    pub upload_id: String,
    pub part_number: i32,
    pub content_length: u64,
}

/// Mutable state of the upload: which parts the server has confirmed.
///
/// Parts are appended only after the server acknowledges them, in strictly
/// increasing part-number order, so `offset` is always the sum of the
/// recorded sizes and `next_part_number` is always `len + 1`.
#[derive(Debug, Clone, Default)]
pub struct UploadState {
    pub upload_id: String,
    pub parts: Vec<PartRecord>,
    pub offset: u64,
}

impl UploadState {
    #[must_use]
    pub fn new(upload_id: String) -> Self {
        Self {
            upload_id,
            parts: Vec::new(),
            offset: 0,
        }
    }

    #[must_use]
    pub fn next_part_number(&self) -> i32 {
        self.parts.len() as i32 + 1
    }

    /// Append a confirmed part and advance the offset.
    pub fn record(&mut self, part: PartRecord) {
        self.offset += part.size;
        self.parts.push(part);
    }
}

/// The multipart operations the coordinator needs, with S3 semantics.
///
/// Implementations must be `Send + Sync`; the part upload runs on its own
/// task while the coordinator keeps handling input.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe the destination object. A 404 from the store maps to
    /// [`ObjectStatus::Missing`]; any other failure is an error.
    async fn head_object(&self) -> Result<ObjectStatus>;

    /// The bucket's region. An empty location constraint means `us-east-1`.
    async fn bucket_region(&self) -> Result<String>;

    /// All in-progress multipart uploads whose key matches the destination.
    /// Paginated internally.
    async fn list_uploads(&self) -> Result<Vec<UploadInfo>>;

    /// All parts of the given upload, paginated internally.
    async fn list_parts(&self, upload_id: &str) -> Result<Vec<PartInfo>>;

    /// Start a multipart upload with the full creation parameters from the
    /// config (which may carry a pre-flight `sha256sum` metadata entry the
    /// construction-time config did not).
    async fn create_upload(&self, config: &UploadConfig) -> Result<String>;

    /// Upload one part. The body is consumed even on failure; the caller
    /// retries with a fresh reader.
    async fn upload_part(&self, request: &PartRequest, body: PartBody) -> Result<PartReceipt>;

    /// Assemble the object from the ordered parts. The response is returned
    /// as JSON for the caller to print.
    async fn complete_upload(
        &self,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> Result<serde_json::Value>;

    /// Whether the wire is unencrypted, in which case the transport reads
    /// each body once to hash it before transmitting and the limiter's
    /// first-pass bypass pays off.
    fn is_unencrypted(&self) -> bool {
        false
    }
}

/// Drain a part body, returning the bytes read. Shared by mock stores in
/// tests; the real store streams instead.
pub async fn drain_body(mut body: PartBody) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)
        .await
        .context("failed to read part body")?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn open_region_bounds_the_read() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();

        let limiter = RateLimiter::new(0, false);
        let body = open_region(
            &file,
            FileRegion {
                offset: 3,
                length: 4,
            },
            limiter,
        )
        .await
        .unwrap();
        let bytes = drain_body(body).await.unwrap();
        assert_eq!(bytes, b"3456");
    }

    #[test]
    fn upload_state_tracks_offset_and_numbering() {
        let mut state = UploadState::new("id".to_string());
        assert_eq!(state.next_part_number(), 1);
        state.record(PartRecord {
            part_number: 1,
            etag: "e1".to_string(),
            size: 100,
            checksums: PartChecksums::default(),
        });
        assert_eq!(state.offset, 100);
        assert_eq!(state.next_part_number(), 2);
    }
}

//! Shared test support: a scriptable in-memory object store and config
//! fixtures for driving the coordinator end to end.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow, ensure};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use barge::config::UploadConfig;
use barge::store::{
    ObjectStatus, ObjectStore, PartBody, PartChecksums, PartInfo, PartReceipt, PartRecord,
    PartRequest, UploadInfo, drain_body,
};

/// Everything the coordinator asked the store to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Head,
    ListUploads,
    ListParts,
    Create,
    UploadPart(i32),
    Complete(Vec<i32>),
}

/// In-memory store with scripted responses and full call recording.
#[derive(Default)]
pub struct MockStore {
    pub object_exists: bool,
    pub uploads: Vec<UploadInfo>,
    pub parts: Vec<PartInfo>,
    failures: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<Call>>,
    bodies: Mutex<Vec<Vec<u8>>>,
    completed: Mutex<Vec<PartRecord>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of upcoming `UploadPart` calls; `true` injects a
    /// transport failure. Unscripted calls succeed.
    pub fn script_part_failures(&self, outcomes: &[bool]) {
        self.failures.lock().extend(outcomes.iter().copied());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn part_calls(&self) -> Vec<i32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Bodies of the successfully uploaded parts, in order.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().clone()
    }

    /// The parts handed to `CompleteMultipartUpload`.
    pub fn completed(&self) -> Vec<PartRecord> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn head_object(&self) -> Result<ObjectStatus> {
        self.calls.lock().push(Call::Head);
        Ok(if self.object_exists {
            ObjectStatus::Exists
        } else {
            ObjectStatus::Missing
        })
    }

    async fn bucket_region(&self) -> Result<String> {
        Ok("us-east-1".to_string())
    }

    async fn list_uploads(&self) -> Result<Vec<UploadInfo>> {
        self.calls.lock().push(Call::ListUploads);
        Ok(self.uploads.clone())
    }

    async fn list_parts(&self, _upload_id: &str) -> Result<Vec<PartInfo>> {
        self.calls.lock().push(Call::ListParts);
        Ok(self.parts.clone())
    }

    async fn create_upload(&self, _config: &UploadConfig) -> Result<String> {
        self.calls.lock().push(Call::Create);
        Ok("mock-upload-id".to_string())
    }

    async fn upload_part(&self, request: &PartRequest, body: PartBody) -> Result<PartReceipt> {
        self.calls.lock().push(Call::UploadPart(request.part_number));
        let bytes = drain_body(body).await?;
        ensure!(
            bytes.len() as u64 == request.content_length,
            "body length {} does not match the declared content length {}",
            bytes.len(),
            request.content_length
        );
        if self.failures.lock().pop_front() == Some(true) {
            return Err(anyhow!("injected transport failure"));
        }
        self.bodies.lock().push(bytes);
        Ok(PartReceipt {
            etag: format!("\"etag-{}\"", request.part_number),
            checksums: PartChecksums::default(),
        })
    }

    async fn complete_upload(&self, upload_id: &str, parts: &[PartRecord]) -> Result<Value> {
        self.calls
            .lock()
            .push(Call::Complete(parts.iter().map(|p| p.part_number).collect()));
        self.completed.lock().extend(parts.iter().cloned());
        Ok(json!({
            "Bucket": "mock-bucket",
            "ETag": "\"assembled\"",
            "Key": "mock-key",
            "Location": format!("https://mock-bucket.example/{upload_id}"),
        }))
    }
}

/// An in-progress upload entry the mock can report.
pub fn upload_info(storage_class: Option<&str>) -> UploadInfo {
    UploadInfo {
        key: "mock-key".to_string(),
        upload_id: "mock-upload-id".to_string(),
        initiated: None,
        storage_class: storage_class.map(str::to_string),
    }
}

/// A server-side part entry the mock can report.
pub fn part_info(part_number: i32, size: u64) -> PartInfo {
    PartInfo {
        part_number,
        size,
        etag: format!("\"etag-{part_number}\""),
        last_modified: None,
        checksums: PartChecksums::default(),
    }
}

/// A config pointing at `file` with an explicit part size.
pub fn config_for(file: &Path, part_size: Option<u64>) -> UploadConfig {
    UploadConfig {
        bucket: "mock-bucket".to_string(),
        key: "mock-key".to_string(),
        file: file.to_path_buf(),
        part_size,
        region_default: "us-east-1".to_string(),
        ..UploadConfig::default()
    }
}

//! aws-sdk-s3 implementation of the store contract.
//!
//! Construction happens in two steps, the way the service requires: a
//! bootstrap client using the configured default region looks up the
//! bucket's actual location, then the real client is built against that
//! region with the endpoint shape (dualstack, accelerate, path-style,
//! custom endpoint) from the config.

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart, ObjectLockLegalHoldStatus,
    ObjectLockMode, RequestPayer, ServerSideEncryption, StorageClass,
};
use aws_smithy_types::body::SdkBody;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use http_body_util::StreamBody;
use serde_json::{Map, Value, json};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{
    ObjectStatus, ObjectStore, PartBody, PartChecksums, PartInfo, PartReceipt, PartRecord,
    PartRequest, UploadInfo,
};
use crate::config::UploadConfig;
use crate::constants::{FALLBACK_REGION, PART_STREAM_CHUNK};

/// S3 client bound to one `(bucket, key)` destination.
pub struct AwsStore {
    client: Client,
    config: UploadConfig,
    region: String,
    unencrypted: bool,
}

impl AwsStore {
    /// Resolve the bucket's region and build the client.
    ///
    /// # Errors
    ///
    /// Returns an error when the shared config cannot be loaded or the
    /// bucket location lookup fails.
    pub async fn connect(config: &UploadConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region_default.clone()));
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if config.dualstack {
            loader = loader.use_dual_stack(true);
        }
        let shared = loader.load().await;

        let bootstrap = Client::new(&shared);
        let region = lookup_region(&bootstrap, &config.bucket).await?;
        debug!(bucket = %config.bucket, %region, "resolved bucket region");

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).region(Region::new(region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        if config.path_style {
            builder = builder.force_path_style(true);
        }
        if config.accelerate {
            builder = builder.accelerate(true);
        }

        let unencrypted = config
            .endpoint_url
            .as_deref()
            .is_some_and(|url| url.starts_with("http://"));

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config: config.clone(),
            region,
            unencrypted,
        })
    }
}

async fn lookup_region(client: &Client, bucket: &str) -> Result<String> {
    let output = client
        .get_bucket_location()
        .bucket(bucket)
        .send()
        .await
        .context("GetBucketLocation failed")?;
    Ok(match output.location_constraint() {
        Some(constraint) if !constraint.as_str().is_empty() => constraint.as_str().to_string(),
        // A null or empty constraint is how the service spells us-east-1.
        _ => FALLBACK_REGION.to_string(),
    })
}

/// Reject storage classes the service does not know about, listing the
/// valid ones in the error.
pub fn validate_storage_class(value: &str) -> Result<()> {
    let known = StorageClass::values();
    if known.contains(&value) {
        Ok(())
    } else {
        bail!(
            "unknown storage class {value:?}; valid values: {}",
            known.join(", ")
        )
    }
}

fn to_chrono(ts: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn parse_retain_until(value: &str) -> Result<aws_smithy_types::DateTime> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid retain-until date {value:?} (expected RFC 3339)"))?;
    Ok(aws_smithy_types::DateTime::from_secs(parsed.timestamp()))
}

#[async_trait]
impl ObjectStore for AwsStore {
    async fn head_object(&self) -> Result<ObjectStatus> {
        let result = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&self.config.key)
            .set_expected_bucket_owner(self.config.expected_bucket_owner.clone())
            .send()
            .await;
        match result {
            Ok(_) => Ok(ObjectStatus::Exists),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(ObjectStatus::Missing)
                } else {
                    Err(anyhow!(service_err).context("HeadObject failed"))
                }
            }
        }
    }

    async fn bucket_region(&self) -> Result<String> {
        Ok(self.region.clone())
    }

    async fn list_uploads(&self) -> Result<Vec<UploadInfo>> {
        let mut pages = self
            .client
            .list_multipart_uploads()
            .bucket(&self.config.bucket)
            .prefix(&self.config.key)
            .into_paginator()
            .send();

        let mut uploads = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("ListMultipartUploads failed")?;
            for upload in page.uploads() {
                let Some(key) = upload.key() else { continue };
                if key != self.config.key {
                    continue;
                }
                uploads.push(UploadInfo {
                    key: key.to_string(),
                    upload_id: upload.upload_id().unwrap_or_default().to_string(),
                    initiated: upload.initiated().and_then(to_chrono),
                    storage_class: upload.storage_class().map(|sc| sc.as_str().to_string()),
                });
            }
        }
        Ok(uploads)
    }

    async fn list_parts(&self, upload_id: &str) -> Result<Vec<PartInfo>> {
        let mut pages = self
            .client
            .list_parts()
            .bucket(&self.config.bucket)
            .key(&self.config.key)
            .upload_id(upload_id)
            .into_paginator()
            .send();

        let mut parts = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("ListParts failed")?;
            for part in page.parts() {
                parts.push(PartInfo {
                    part_number: part.part_number().unwrap_or_default(),
                    size: part.size().unwrap_or_default().max(0) as u64,
                    etag: part.e_tag().unwrap_or_default().to_string(),
                    last_modified: part.last_modified().and_then(to_chrono),
                    checksums: PartChecksums {
                        crc32: part.checksum_crc32().map(str::to_string),
                        crc32c: part.checksum_crc32_c().map(str::to_string),
                        sha1: part.checksum_sha1().map(str::to_string),
                        sha256: part.checksum_sha256().map(str::to_string),
                    },
                });
            }
        }
        Ok(parts)
    }

    async fn create_upload(&self, config: &UploadConfig) -> Result<String> {
        let metadata = if config.metadata.is_empty() {
            None
        } else {
            Some(config.metadata.clone())
        };
        let retain_until = config
            .object_lock_retain_until
            .as_deref()
            .map(parse_retain_until)
            .transpose()?;

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&config.bucket)
            .key(&config.key)
            .set_content_type(config.content_type.clone())
            .set_cache_control(config.cache_control.clone())
            .set_content_disposition(config.content_disposition.clone())
            .set_content_encoding(config.content_encoding.clone())
            .set_content_language(config.content_language.clone())
            .set_tagging(config.tagging.clone())
            .set_metadata(metadata)
            .set_storage_class(config.storage_class.as_deref().map(StorageClass::from))
            .set_checksum_algorithm(
                config
                    .checksum_algorithm
                    .as_deref()
                    .map(ChecksumAlgorithm::from),
            )
            .set_server_side_encryption(config.sse.as_deref().map(ServerSideEncryption::from))
            .set_ssekms_key_id(config.sse_kms_key_id.clone())
            .set_sse_customer_algorithm(config.sse_customer_algorithm.clone())
            .set_sse_customer_key(config.sse_customer_key.clone())
            .set_sse_customer_key_md5(config.sse_customer_key_md5.clone())
            .set_object_lock_legal_hold_status(
                config
                    .object_lock_legal_hold
                    .as_deref()
                    .map(ObjectLockLegalHoldStatus::from),
            )
            .set_object_lock_mode(config.object_lock_mode.as_deref().map(ObjectLockMode::from))
            .set_object_lock_retain_until_date(retain_until)
            .set_request_payer(config.request_payer.as_deref().map(RequestPayer::from))
            .set_expected_bucket_owner(config.expected_bucket_owner.clone())
            .send()
            .await
            .context("CreateMultipartUpload failed")?;

        output
            .upload_id()
            .map(str::to_string)
            .context("CreateMultipartUpload returned no upload id")
    }

    async fn upload_part(&self, request: &PartRequest, body: PartBody) -> Result<PartReceipt> {
        let stream = ReaderStream::with_capacity(body, PART_STREAM_CHUNK);
        let byte_stream =
            ByteStream::new(SdkBody::from_body_1_x(StreamBody::new(
                stream.map_ok(http_body::Frame::data),
            )));

        let output = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(&self.config.key)
            .upload_id(&request.upload_id)
            .part_number(request.part_number)
            .content_length(request.content_length as i64)
            .body(byte_stream)
            .set_checksum_algorithm(
                self.config
                    .checksum_algorithm
                    .as_deref()
                    .map(ChecksumAlgorithm::from),
            )
            .set_sse_customer_algorithm(self.config.sse_customer_algorithm.clone())
            .set_sse_customer_key(self.config.sse_customer_key.clone())
            .set_sse_customer_key_md5(self.config.sse_customer_key_md5.clone())
            .set_request_payer(self.config.request_payer.as_deref().map(RequestPayer::from))
            .set_expected_bucket_owner(self.config.expected_bucket_owner.clone())
            .send()
            .await
            .with_context(|| format!("UploadPart {} failed", request.part_number))?;

        Ok(PartReceipt {
            etag: output.e_tag().unwrap_or_default().to_string(),
            checksums: PartChecksums {
                crc32: output.checksum_crc32().map(str::to_string),
                crc32c: output.checksum_crc32_c().map(str::to_string),
                sha1: output.checksum_sha1().map(str::to_string),
                sha256: output.checksum_sha256().map(str::to_string),
            },
        })
    }

    async fn complete_upload(
        &self,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> Result<Value> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .set_checksum_crc32(part.checksums.crc32.clone())
                    .set_checksum_crc32_c(part.checksums.crc32c.clone())
                    .set_checksum_sha1(part.checksums.sha1.clone())
                    .set_checksum_sha256(part.checksums.sha256.clone())
                    .build()
            })
            .collect();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&self.config.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .set_sse_customer_algorithm(self.config.sse_customer_algorithm.clone())
            .set_sse_customer_key(self.config.sse_customer_key.clone())
            .set_sse_customer_key_md5(self.config.sse_customer_key_md5.clone())
            .set_request_payer(self.config.request_payer.as_deref().map(RequestPayer::from))
            .set_expected_bucket_owner(self.config.expected_bucket_owner.clone())
            .send()
            .await
            .context("CompleteMultipartUpload failed")?;

        // serde_json's map is sorted, which is exactly what the final stdout
        // report wants.
        let mut response = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                response.insert(key.to_string(), value);
            }
        };
        put("Location", output.location().map(|v| json!(v)));
        put("Bucket", output.bucket().map(|v| json!(v)));
        put("Key", output.key().map(|v| json!(v)));
        put("ETag", output.e_tag().map(|v| json!(v)));
        put("Expiration", output.expiration().map(|v| json!(v)));
        put("VersionId", output.version_id().map(|v| json!(v)));
        put(
            "ServerSideEncryption",
            output.server_side_encryption().map(|v| json!(v.as_str())),
        );
        put("SSEKMSKeyId", output.ssekms_key_id().map(|v| json!(v)));
        put(
            "BucketKeyEnabled",
            output.bucket_key_enabled().map(|v| json!(v)),
        );
        put("ChecksumCRC32", output.checksum_crc32().map(|v| json!(v)));
        put(
            "ChecksumCRC32C",
            output.checksum_crc32_c().map(|v| json!(v)),
        );
        put("ChecksumSHA1", output.checksum_sha1().map(|v| json!(v)));
        put(
            "ChecksumSHA256",
            output.checksum_sha256().map(|v| json!(v)),
        );
        put(
            "RequestCharged",
            output.request_charged().map(|v| json!(v.as_str())),
        );
        Ok(Value::Object(response))
    }

    fn is_unencrypted(&self) -> bool {
        self.unencrypted
    }
}

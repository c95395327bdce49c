//! Upload configuration: the immutable description of one transfer.
//!
//! An [`UploadConfig`] is assembled once at startup from the CLI surface and
//! the process environment, validated, and then never mutated (the one
//! exception is the `sha256sum` metadata entry attached during pre-flight).
//! Everything under "pass-through attributes" is forwarded verbatim to the
//! store and never interpreted here.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::constants::{
    DEFAULT_PART_SIZE, FALLBACK_REGION, MAX_OBJECT_SIZE, MAX_PART_COUNT, MAX_PART_SIZE,
    MIN_PART_SIZE,
};
use crate::utils::format_filesize;

/// Result of configuration validation.
///
/// Warnings are non-fatal findings the caller should print but not act on.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Immutable description of one upload, frozen at startup.
#[derive(Debug, Clone, Default)]
pub struct UploadConfig {
    /// Destination bucket.
    pub bucket: String,
    /// Destination object key.
    pub key: String,
    /// Local file to upload.
    pub file: PathBuf,
    /// Part size override in bytes; selected automatically when `None`.
    pub part_size: Option<u64>,
    /// Initial rate in bytes per second; `0` means unlimited.
    pub rate: u64,
    /// Optional weekly rate schedule file.
    pub schedule: Option<PathBuf>,
    /// Skip the destination existence probe.
    pub force: bool,
    /// Compute and record a digest when SHA256SUMS has no entry.
    pub compute_checksum: bool,
    /// Shared-config profile forwarded to the credential chain.
    pub profile: Option<String>,

    // Pass-through attributes, forwarded verbatim to the store.
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub tagging: Option<String>,
    pub metadata: HashMap<String, String>,
    pub storage_class: Option<String>,
    pub checksum_algorithm: Option<String>,
    pub sse: Option<String>,
    pub sse_kms_key_id: Option<String>,
    pub sse_customer_algorithm: Option<String>,
    pub sse_customer_key: Option<String>,
    pub sse_customer_key_md5: Option<String>,
    pub object_lock_legal_hold: Option<String>,
    pub object_lock_mode: Option<String>,
    pub object_lock_retain_until: Option<String>,
    pub request_payer: Option<String>,
    pub expected_bucket_owner: Option<String>,

    // Endpoint shape.
    pub dualstack: bool,
    pub accelerate: bool,
    pub path_style: bool,
    /// Endpoint URL override, for S3-compatible stores.
    pub endpoint_url: Option<String>,

    /// Region used for the initial bucket-location lookup.
    pub region_default: String,
    /// TOTP secret for the external credential provider's MFA flow.
    pub mfa_secret: Option<String>,
}

impl UploadConfig {
    /// Fold the process environment into the config. Called once at startup;
    /// nothing reads the environment after this.
    pub fn apply_env(&mut self) {
        self.region_default = env::var("AWS_DEFAULT_REGION")
            .ok()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| FALLBACK_REGION.to_string());
        if env::var("AWS_USE_DUALSTACK_ENDPOINT").is_ok_and(|v| v == "true") {
            self.dualstack = true;
        }
        if self.mfa_secret.is_none() {
            self.mfa_secret = env::var("AWS_MFA_SECRET").ok().filter(|s| !s.is_empty());
        }
    }

    /// Validate the config against the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error when the destination is incomplete or the local file
    /// is missing, unreadable, or not a regular file.
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut warnings = Vec::new();

        if self.bucket.is_empty() || self.key.is_empty() {
            bail!("the destination must have the format s3://<bucket>/<key>");
        }

        let meta = std::fs::metadata(&self.file)
            .map_err(|e| anyhow::anyhow!("can not read {}: {e}", self.file.display()))?;
        if !meta.is_file() {
            bail!("{} is not a regular file", self.file.display());
        }
        // A stat can succeed where a read would fail; probe the open too.
        std::fs::File::open(&self.file)
            .map_err(|e| anyhow::anyhow!("can not read {}: {e}", self.file.display()))?;

        if let Some(part_size) = self.part_size
            && !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size)
        {
            warnings.push(format!(
                "part size {} is outside the supported range [{}, {}]; the store may reject it",
                format_filesize(part_size),
                format_filesize(MIN_PART_SIZE),
                format_filesize(MAX_PART_SIZE),
            ));
        }

        Ok(ValidationResult { warnings })
    }

    /// Pick the part size for a file of `file_size` bytes.
    ///
    /// Without an override: start at 8 MiB and double until the file fits in
    /// 10,000 parts, capping at 5 GiB. The returned value is fixed for the
    /// whole upload. Warnings flag sizes the store documents as unsupported.
    pub fn effective_part_size(&self, file_size: u64) -> (u64, Vec<String>) {
        let mut warnings = Vec::new();

        let part_size = match self.part_size {
            Some(explicit) => explicit,
            None => {
                let mut size = DEFAULT_PART_SIZE;
                while MAX_PART_COUNT * size < file_size && size < MAX_PART_SIZE {
                    size *= 2;
                }
                size.min(MAX_PART_SIZE)
            }
        };

        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
            warnings.push(format!(
                "part size {} is outside [{}, {}]",
                format_filesize(part_size),
                format_filesize(MIN_PART_SIZE),
                format_filesize(MAX_PART_SIZE),
            ));
        }
        if file_size > MAX_OBJECT_SIZE {
            warnings.push(format!(
                "file size is greater than {}; at the time of writing that is the maximum \
                 object size, so expect the final assembly to fail",
                format_filesize(MAX_OBJECT_SIZE),
            ));
        }
        if MAX_PART_COUNT * part_size < file_size {
            warnings.push(format!(
                "file is too large to be transferred in {MAX_PART_COUNT} parts of {}",
                format_filesize(part_size),
            ));
        }

        (part_size, warnings)
    }
}

/// Split `s3://<bucket>/<key>` into its pieces.
///
/// Returns `None` when the scheme is missing; an empty bucket or key is
/// returned as-is so the caller can produce one uniform error message.
#[must_use]
pub fn parse_s3_uri(s: &str) -> Option<(String, String)> {
    let rest = s.strip_prefix("s3://")?;
    match rest.split_once('/') {
        Some((bucket, key)) => Some((bucket.to_string(), key.to_string())),
        None => Some((rest.to_string(), String::new())),
    }
}

/// Parse `key=value,key=value` metadata pairs.
///
/// # Errors
///
/// Returns an error when a pair has no `=`.
pub fn parse_metadata(s: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in s.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("malformed metadata entry {pair:?} (expected key=value)");
        };
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::constants::{GIB, MIB};

    fn config_for(file: PathBuf) -> UploadConfig {
        UploadConfig {
            bucket: "bucket".to_string(),
            key: "key".to_string(),
            file,
            ..UploadConfig::default()
        }
    }

    #[test]
    fn parse_s3_uri_shapes() {
        assert_eq!(
            parse_s3_uri("s3://bucket/path/to/key"),
            Some(("bucket".to_string(), "path/to/key".to_string()))
        );
        assert_eq!(
            parse_s3_uri("s3://bucket"),
            Some(("bucket".to_string(), String::new()))
        );
        assert_eq!(parse_s3_uri("http://bucket/key"), None);
        assert_eq!(parse_s3_uri("bucket/key"), None);
    }

    #[test]
    fn parse_metadata_pairs() {
        let map = parse_metadata("a=1,b=two").unwrap();
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("b").map(String::as_str), Some("two"));
        assert!(parse_metadata("novalue").is_err());
    }

    #[test]
    fn part_size_defaults_to_8_mib() {
        let config = UploadConfig::default();
        let (size, warnings) = config.effective_part_size(16 * MIB);
        assert_eq!(size, 8 * MIB);
        assert!(warnings.is_empty());
    }

    #[test]
    fn part_size_doubles_until_file_fits() {
        let config = UploadConfig::default();
        // 10,000 parts of 8 MiB; one byte more forces a doubling.
        let (size, _) = config.effective_part_size(10_000 * 8 * MIB + 1);
        assert_eq!(size, 16 * MIB);
    }

    #[test]
    fn part_size_caps_at_5_gib() {
        let config = UploadConfig::default();
        let (size, warnings) = config.effective_part_size(u64::MAX / 2);
        assert_eq!(size, 5 * GIB);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn part_size_override_warns_outside_range() {
        let config = UploadConfig {
            part_size: Some(MIB),
            ..UploadConfig::default()
        };
        let (size, warnings) = config.effective_part_size(16 * MIB);
        assert_eq!(size, MIB);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("outside"));
    }

    #[test]
    fn validate_rejects_empty_destination() {
        let mut config = config_for(PathBuf::from("/dev/null"));
        config.key = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("s3://<bucket>/<key>"));
    }

    #[test]
    fn validate_rejects_missing_file() {
        let config = config_for(PathBuf::from("/no/such/file"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_readable_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"payload").unwrap();
        let config = config_for(tmp.path().to_path_buf());
        let result = config.validate().unwrap();
        assert!(!result.has_warnings());
    }

    #[test]
    fn validate_warns_on_tiny_part_size_override() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"payload").unwrap();
        let mut config = config_for(tmp.path().to_path_buf());
        config.part_size = Some(1024);
        let result = config.validate().unwrap();
        assert!(result.has_warnings());
    }
}

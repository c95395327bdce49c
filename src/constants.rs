//! Size units, protocol limits, and timing knobs.

use std::time::Duration;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Minimum size of every part except the last.
/// https://docs.aws.amazon.com/AmazonS3/latest/userguide/qfacts.html
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Maximum size of a single part.
pub const MAX_PART_SIZE: u64 = 5 * GIB;

/// Maximum number of parts in one multipart upload.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Largest object the service accepts, at the time of writing.
pub const MAX_OBJECT_SIZE: u64 = 5 * TIB;

/// Starting point for automatic part-size selection (matches the aws cli).
pub const DEFAULT_PART_SIZE: u64 = 8 * MIB;

/// Delay before retrying a failed part upload. Retries are uncapped.
pub const PART_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Refresh interval for the progress line.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Floor for keyboard rate adjustments, bytes per second.
pub const MIN_KEYBOARD_RATE: u64 = 1_000;

/// Rate applied while the space-key pause is engaged.
pub const PAUSE_RATE: u64 = 1_000;

/// Region assumed when the store reports an empty location constraint.
pub const FALLBACK_REGION: &str = "us-east-1";

/// Filename consulted for pre-flight integrity metadata.
pub const SUMS_FILE: &str = "SHA256SUMS";

/// Chunk size for streaming a part body to the transport.
pub const PART_STREAM_CHUNK: usize = 64 * 1024;

//! Typed errors for pre-flight checks and the upload state machine.
//!
//! Transport errors from part uploads never surface here; the coordinator
//! retries those locally. These variants are the fatal conditions callers
//! match on.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The destination probe found an existing object and `--force` was not
    /// given.
    #[error("the object already exists in the bucket; delete it first or pass --force")]
    ObjectExists,

    /// More than one in-progress multipart upload matches the key.
    #[error("more than one upload for this key is in progress; manually abort the duplicates first")]
    AmbiguousResume,

    /// The resumed upload's parts do not form `1..N`.
    #[error("existing parts are not contiguous (part {missing} is missing)")]
    PartsNotContiguous { missing: i32 },

    /// The in-progress upload was created with a different storage class.
    #[error(
        "existing upload uses the storage class {existing}, but {requested} was requested; \
         make them match or drop --storage-class"
    )]
    StorageClassMismatch { existing: String, requested: String },

    /// The parts already on the server add up to more than the local file.
    #[error("size of parts already uploaded ({uploaded} bytes) exceeds the local file size ({file_size} bytes)")]
    ResumeOverrun { uploaded: u64, file_size: u64 },

    /// The part loop ended without covering the whole file.
    #[error("offset and file size disagree after the part loop")]
    OffsetMismatch { offset: u64, file_size: u64 },

    /// The user asked to stop; the upload is left in place for a later resume.
    #[error("interrupted; the multipart upload is left in place for resume")]
    Interrupted,
}

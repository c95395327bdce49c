//! Resume discovery: find an in-progress upload for the destination key and
//! rebuild the upload state from the parts the server already accepted.

use anyhow::Result;

use crate::config::UploadConfig;
use crate::constants::MIN_PART_SIZE;
use crate::error::Error;
use crate::store::{ObjectStore, PartRecord, UploadInfo, UploadState};
use crate::ui;
use crate::utils::format_filesize;

/// Find the in-progress multipart upload matching the destination, if any.
///
/// # Errors
///
/// Fails when more than one upload matches (the duplicates must be aborted
/// by hand) or when the existing upload's storage class contradicts the
/// requested one.
pub async fn find_existing(
    store: &dyn ObjectStore,
    config: &UploadConfig,
) -> Result<Option<UploadInfo>> {
    let mut uploads = store.list_uploads().await?.into_iter();
    let Some(found) = uploads.next() else {
        return Ok(None);
    };
    if uploads.next().is_some() {
        return Err(Error::AmbiguousResume.into());
    }

    if let Some(requested) = &config.storage_class {
        let existing = found.storage_class.clone().unwrap_or_default();
        if *requested != existing {
            return Err(Error::StorageClassMismatch {
                existing,
                requested: requested.clone(),
            }
            .into());
        }
    }

    Ok(Some(found))
}

/// Rebuild [`UploadState`] from the server's part list and decide the part
/// size for the remainder of the upload.
///
/// All non-final parts must share part 1's size for the final assembly to
/// succeed, so when the server's part 1 disagrees with the locally computed
/// size, the continuation adopts the server's.
///
/// # Errors
///
/// Fails on part-number gaps or when the resumed bytes exceed the file.
pub async fn reconstruct(
    store: &dyn ObjectStore,
    upload: &UploadInfo,
    file_size: u64,
    computed_part_size: u64,
) -> Result<(UploadState, u64)> {
    let mut parts = store.list_parts(&upload.upload_id).await?;
    parts.sort_by_key(|part| part.part_number);

    for (index, part) in parts.iter().enumerate() {
        let expected = index as i32 + 1;
        if part.part_number != expected {
            return Err(Error::PartsNotContiguous { missing: expected }.into());
        }
    }

    let mut state = UploadState::new(upload.upload_id.clone());
    for part in &parts {
        state.record(PartRecord {
            part_number: part.part_number,
            etag: part.etag.clone(),
            size: part.size,
            checksums: part.checksums.clone(),
        });
    }

    if state.offset > file_size {
        return Err(Error::ResumeOverrun {
            uploaded: state.offset,
            file_size,
        }
        .into());
    }

    let mut part_size = computed_part_size;
    if let Some(first) = parts.first() {
        // Every part the server holds except the last it has seen so far is
        // non-final and must line up with part 1.
        for part in &parts[..parts.len() - 1] {
            if part.size != first.size {
                ui::warning(&format!(
                    "part {} is {} but part 1 is {}; the resumed upload looks inconsistent",
                    part.part_number,
                    format_filesize(part.size),
                    format_filesize(first.size),
                ));
            }
            if part.size < MIN_PART_SIZE {
                ui::warning(&format!(
                    "part {} is smaller than the {} minimum; completing the upload will fail",
                    part.part_number,
                    format_filesize(MIN_PART_SIZE),
                ));
            }
        }

        if first.size != computed_part_size && first.size > 0 {
            ui::notice(&format!(
                "Continuing with the existing upload's part size of {}.",
                format_filesize(first.size)
            ));
            part_size = first.size;
        }
    }

    Ok((state, part_size))
}

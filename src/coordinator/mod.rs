//! Upload coordination: pre-flight, resume, the part loop, completion.
//!
//! Four loosely coupled tasks cooperate here: the coordinator's own select
//! loop below, the in-flight part upload, the stdin reader, and the
//! schedule driver. They meet at the shared rate limiter, the interrupt
//! flags, and the input event channel - nothing else is shared.
//!
//! Parts are uploaded strictly one at a time. A transient failure sleeps
//! ten seconds and retries the same part with a fresh reader, forever; on a
//! link that drops for hours that is exactly the behavior that eventually
//! finishes the job.

mod keys;
mod resume;

pub use keys::{ControlState, Feedback, KeyAction, action_for, apply};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tracing::{debug, warn};

use crate::checksum;
use crate::config::UploadConfig;
use crate::constants::{PART_RETRY_DELAY, SUMS_FILE, TICK_INTERVAL};
use crate::error::Error;
use crate::input::{Event, Interrupts};
use crate::limiter::RateLimiter;
use crate::store::{
    FileRegion, ObjectStatus, ObjectStore, PartRecord, PartRequest, UploadState, open_region,
};
use crate::ui;
use crate::utils::format_filesize;

/// How one part attempt ended.
enum PartOutcome {
    Done(PartRecord),
    Retry,
}

/// The top-level state machine driving one upload.
pub struct Coordinator {
    store: Arc<dyn ObjectStore>,
    config: UploadConfig,
    limiter: Arc<RateLimiter>,
    events: mpsc::Receiver<Event>,
    interrupts: Arc<Interrupts>,
    state: ControlState,
    events_open: bool,
}

impl Coordinator {
    /// Wire up a coordinator. The limiter carries the effective initial
    /// rate (the schedule's, when one is loaded); `config.rate` stays the
    /// `--bwlimit` value that the `r` key restores.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: UploadConfig,
        limiter: Arc<RateLimiter>,
        events: mpsc::Receiver<Event>,
        interrupts: Arc<Interrupts>,
    ) -> Self {
        let state = ControlState::new(limiter.limit(), config.rate);
        Self {
            store,
            config,
            limiter,
            events,
            interrupts,
            state,
            events_open: true,
        }
    }

    /// Run the upload to completion and return the store's completion
    /// response for the caller to print.
    ///
    /// # Errors
    ///
    /// Pre-flight problems, resume inconsistencies, interrupts, and a failed
    /// completion all surface here; per-part transport errors do not (they
    /// are retried in place).
    pub async fn run(mut self) -> Result<Value> {
        // Held open for the whole upload; parts read through clones of this
        // handle.
        let file = std::fs::File::open(&self.config.file)
            .with_context(|| format!("can not read {}", self.config.file.display()))?;
        let file_size = file
            .metadata()
            .with_context(|| format!("can not read {}", self.config.file.display()))?
            .len();
        ui::notice(&format!("File size: {}", format_filesize(file_size)));

        let (part_size, warnings) = self.config.effective_part_size(file_size);
        for warning in &warnings {
            ui::warning(warning);
        }
        ui::notice(&format!("Part size: {}", format_filesize(part_size)));
        ui::notice(&format!(
            "The upload will consist of {} parts.",
            file_size.div_ceil(part_size).max(1)
        ));

        self.attach_checksum().await?;

        if !self.config.force {
            match self
                .store
                .head_object()
                .await
                .context("existence check failed")?
            {
                ObjectStatus::Exists => return Err(Error::ObjectExists.into()),
                ObjectStatus::Missing => {}
            }
        }

        ui::notice("Checking if this upload is already in progress.");
        let (mut upload, part_size) =
            match resume::find_existing(self.store.as_ref(), &self.config).await? {
                Some(found) => {
                    ui::notice(&format!(
                        "Found an upload in progress with upload id: {}",
                        found.upload_id
                    ));
                    if let Some(initiated) = found.initiated {
                        ui::notice(&format!(
                            "Upload started at {}.",
                            initiated.with_timezone(&chrono::Local)
                        ));
                    }
                    let (state, part_size) =
                        resume::reconstruct(self.store.as_ref(), &found, file_size, part_size)
                            .await?;
                    ui::notice(&format!(
                        "{} already uploaded in {} parts.",
                        format_filesize(state.offset),
                        state.parts.len()
                    ));
                    (state, part_size)
                }
                None => {
                    ui::notice("Creating multipart upload.");
                    let upload_id = self.store.create_upload(&self.config).await?;
                    ui::notice(&format!("Upload id: {upload_id}"));
                    (UploadState::new(upload_id), part_size)
                }
            };

        ui::notice("");
        ui::notice("Tip: Press ? to see the available keyboard controls.");
        self.limiter.set_total(upload.offset, file_size);

        while upload.offset < file_size {
            self.pause_gate().await?;

            let region = FileRegion {
                offset: upload.offset,
                length: part_size.min(file_size - upload.offset),
            };
            let part_number = upload.next_part_number();

            match self
                .upload_one_part(&file, &upload, part_number, region, file_size)
                .await?
            {
                PartOutcome::Done(record) => {
                    upload.record(record);
                    if self.interrupts.pending() && !self.state.paused {
                        ui::notice("Exited early.");
                        return Err(Error::Interrupted.into());
                    }
                }
                PartOutcome::Retry => {
                    if self.interrupts.pending() {
                        return Err(Error::Interrupted.into());
                    }
                    // A second interrupt during this wait aborts outright
                    // via the interrupt handler.
                    sleep(PART_RETRY_DELAY).await;
                }
            }
        }

        if upload.offset != file_size {
            return Err(Error::OffsetMismatch {
                offset: upload.offset,
                file_size,
            }
            .into());
        }

        ui::notice("Completing the multipart upload.");
        self.store
            .complete_upload(&upload.upload_id, &upload.parts)
            .await
    }

    /// Attach the SHA256SUMS digest to the object metadata, computing and
    /// recording one when asked to.
    async fn attach_checksum(&mut self) -> Result<()> {
        let sums = Path::new(SUMS_FILE);
        if sums.exists() {
            match checksum::lookup(sums, &self.config.file)? {
                Some(sum) => {
                    self.config.metadata.insert("sha256sum".to_string(), sum);
                    return Ok(());
                }
                None if !self.config.compute_checksum => {
                    ui::warning(
                        "SHA256SUMS file is present but does not have an entry for this file.",
                    );
                    return Ok(());
                }
                None => {}
            }
        } else if !self.config.compute_checksum {
            return Ok(());
        }

        ui::notice("Computing the file checksum.");
        let file = self.config.file.clone();
        let sum = tokio::task::spawn_blocking(move || checksum::compute(&file))
            .await
            .context("checksum task failed")??;
        checksum::append(sums, &self.config.file, &sum)?;
        self.config.metadata.insert("sha256sum".to_string(), sum);
        Ok(())
    }

    /// Block while `paused`. Only the space key resumes; an interrupt while
    /// waiting here exits (there is no in-flight part to finish).
    async fn pause_gate(&mut self) -> Result<()> {
        while self.state.paused {
            if self.interrupts.pending() {
                return Err(Error::Interrupted.into());
            }
            ui::pause_notice();
            tokio::select! {
                event = self.events.recv(), if self.events_open => match event {
                    Some(Event::Key(key)) => self.handle_key(key, 0),
                    None => self.events_open = false,
                },
                () = self.interrupts.notified() => {
                    return Err(Error::Interrupted.into());
                }
            }
        }
        Ok(())
    }

    /// Upload one part, multiplexing the transfer with the 1 Hz progress
    /// tick and the input channel.
    async fn upload_one_part(
        &mut self,
        file: &std::fs::File,
        upload: &UploadState,
        part_number: i32,
        region: FileRegion,
        file_size: u64,
    ) -> Result<PartOutcome> {
        let started = Instant::now();

        let body = open_region(file, region, Arc::clone(&self.limiter)).await?;
        self.limiter.set_transfer_size(region.length);
        self.limiter.set_total(region.offset, file_size);

        let request = PartRequest {
            upload_id: upload.upload_id.clone(),
            part_number,
            content_length: region.length,
        };
        debug!(part = part_number, offset = region.offset, length = region.length, "starting part");

        let store = Arc::clone(&self.store);
        let task_request = request.clone();
        let mut task = tokio::spawn(async move { store.upload_part(&task_request, body).await });

        let mut tick = interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let joined = loop {
            tokio::select! {
                result = &mut task => break result,
                _ = tick.tick() => {
                    ui::render_progress(part_number, &self.limiter.status());
                }
                event = self.events.recv(), if self.events_open => match event {
                    Some(Event::Key(key)) => self.handle_key(key, part_number),
                    None => self.events_open = false,
                },
                () = self.interrupts.notified() => {}
            }
        };

        match joined.context("part upload task panicked")? {
            Ok(receipt) => {
                ui::part_done(part_number, started.elapsed());
                Ok(PartOutcome::Done(PartRecord {
                    part_number,
                    etag: receipt.etag,
                    size: region.length,
                    checksums: receipt.checksums,
                }))
            }
            Err(error) => {
                ui::part_failed(part_number, &error, PART_RETRY_DELAY);
                warn!(part = part_number, error = %error, "part upload failed, will retry");
                Ok(PartOutcome::Retry)
            }
        }
    }

    /// Route one published key through the pure action core and perform its
    /// side effects.
    fn handle_key(&mut self, key: char, part_number: i32) {
        let Some(action) = action_for(key) else {
            return;
        };
        self.state.exit_pending = self.interrupts.pending();
        match apply(action, &mut self.state) {
            Feedback::RateChanged(rate) => {
                self.limiter.set_limit(rate.min(i64::MAX as u64) as i64);
                ui::rate_feedback(rate);
            }
            Feedback::FastPause { paused, rate } => {
                self.limiter.set_limit(rate.min(i64::MAX as u64) as i64);
                ui::fast_pause_notice(paused, rate);
            }
            Feedback::ShowStatus => ui::status_block(
                &self.config,
                part_number,
                &self.limiter.status(),
                self.state.paused,
                self.interrupts.pending(),
            ),
            Feedback::PartPause(paused) => ui::part_pause_notice(paused),
            Feedback::ExitCancelled => {
                self.interrupts.clear();
                ui::exit_cancelled();
            }
            Feedback::Help => ui::help(),
            Feedback::Newline => ui::newline(),
        }
    }
}

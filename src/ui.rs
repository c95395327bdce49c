//! Terminal rendering for the interactive control plane.
//!
//! Everything here writes to standard error; standard output is reserved
//! for the final completion response. The in-flight progress line is
//! redrawn in place with `ESC[2K CR`.
//!
//! Raw mode leaves the terminal's output post-processing off, so finished
//! lines end with an explicit CRLF instead of relying on `eprintln!`.

use std::fmt::Display;
use std::time::Duration;

use crate::config::UploadConfig;
use crate::limiter::LimiterStatus;
use crate::utils::{format_eta, format_limit, format_size};

const CLEAR_LINE: &str = "\x1b[2K\r";

fn emit(message: impl Display) {
    eprint!("{message}\r\n");
}

/// Redraw the one-line progress display for the in-flight part.
pub fn render_progress(part_number: i32, status: &LimiterStatus) {
    eprint!(
        "{CLEAR_LINE}Uploading part {part_number}: {:.1}%, {}/s{}, {} remaining. (total: {:.1}%, {} remaining)",
        status.progress * 100.0,
        format_size(status.cur_rate),
        format_limit(status.limit),
        format_eta(status.time_remaining),
        status.total_progress * 100.0,
        format_eta(status.total_time_remaining),
    );
}

pub fn part_done(part_number: i32, elapsed: Duration) {
    emit(format!(
        "{CLEAR_LINE}Uploaded part {part_number} in {}.",
        format_eta(Some(elapsed))
    ));
}

pub fn part_failed(part_number: i32, error: &anyhow::Error, retry_delay: Duration) {
    newline();
    newline();
    emit(format!("Error uploading part {part_number}: {error:#}"));
    emit(format!(
        "Waiting {} seconds and then retrying.",
        retry_delay.as_secs()
    ));
    newline();
}

/// A plain informational line.
pub fn notice(message: &str) {
    emit(message);
}

pub fn warning(message: &str) {
    emit(format!("Warning: {message}"));
}

pub fn newline() {
    eprint!("\r\n");
}

pub fn schedule_notice(rate: u64) {
    if rate == 0 {
        emit("\nSchedule: unlimited transfer rate.");
    } else {
        emit(format!(
            "\nSchedule: transfer limit set to {}/s.",
            format_size(rate)
        ));
    }
}

pub fn interrupt_notice() {
    emit(
        "\nInterrupt received, finishing current part. \
         Press Ctrl-C again to exit immediately. Press the space key to cancel exit.",
    );
}

pub fn pause_notice() {
    emit("Transfer is paused. Press the space key to resume.");
}

pub fn rate_feedback(rate: u64) {
    if rate == 0 {
        emit("\nUnlimited transfer rate.");
    } else {
        emit(format!("\nTransfer limit set to: {}/s", format_size(rate)));
    }
}

pub fn part_pause_notice(paused: bool) {
    if paused {
        emit("\nTransfer will pause after the current part.");
    } else {
        emit("\nWill not pause.");
    }
}

pub fn fast_pause_notice(paused: bool, rate: u64) {
    if rate == 0 {
        eprint!("\nUnlimited transfer rate.");
    } else {
        eprint!("\nTransfer limit set to: {}/s.", format_size(rate));
    }
    if paused {
        eprint!(" Transfer will pause after the current part.");
    }
    newline();
}

pub fn exit_cancelled() {
    emit("\nExit cancelled.");
}

/// The `i` key: a multi-line snapshot of where the upload stands.
pub fn status_block(
    config: &UploadConfig,
    part_number: i32,
    status: &LimiterStatus,
    paused: bool,
    exit_pending: bool,
) {
    newline();
    newline();
    emit(format!("Uploading: {}", config.file.display()));
    emit(format!("Destination: s3://{}/{}", config.bucket, config.key));
    emit(format!("Current part: {part_number}"));
    emit(format!(
        "Rate: {}/s{}",
        format_size(status.cur_rate),
        format_limit(status.limit)
    ));
    emit(format!(
        "Progress: {:.1}% of the part, {:.1}% overall",
        status.progress * 100.0,
        status.total_progress * 100.0
    ));
    emit(format!(
        "Remaining: {} for the part, {} overall",
        format_eta(status.time_remaining),
        format_eta(status.total_time_remaining)
    ));
    if paused {
        emit("Transfer will pause after the current part.");
    }
    if exit_pending {
        emit("Exit pending: the upload stops after the current part.");
    }
    newline();
}

/// The `?` key.
pub fn help() {
    newline();
    newline();
    emit("i       - print upload status");
    emit("u       - set to unlimited transfer rate");
    emit("r       - restore initial transfer limit (from --bwlimit)");
    emit("a s d f - increase transfer limit by 1, 10, 100, or 250 kB/s");
    emit("z x c v - decrease transfer limit by 1, 10, 100, or 250 kB/s");
    emit("0-9     - limit the transfer rate to 0.X MB/s");
    emit("p       - pause transfer after current part");
    emit("[space] - pause transfer (sets transfer limit to 1 kB/s)");
    emit("Ctrl-C  - exit after current part");
    emit("          press twice to abort immediately");
    newline();
}

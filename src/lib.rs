//! barge uploads a single large file to an S3-compatible object store using
//! the multipart upload protocol, built for slow or unreliable residential
//! links where a transfer may span hours or days.
//!
//! The pieces:
//!
//! - [`limiter`] - throttled reader wrapping each part's byte stream
//! - [`schedule`] - weekly time-of-day rate schedule
//! - [`input`] - single-key stdin control plane
//! - [`coordinator`] - the multipart state machine driving everything
//! - [`store`] - the object-store contract and its aws-sdk-s3 implementation
//!
//! The binary in `main.rs` only parses flags, assembles an
//! [`config::UploadConfig`], and hands control to the coordinator.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod limiter;
pub mod schedule;
pub mod store;
pub mod ui;
pub mod utils;

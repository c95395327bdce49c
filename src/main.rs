//! barge - resumable, rate-limited multipart uploads for slow links.
//!
//! The binary stays thin: parse flags, assemble the immutable
//! [`UploadConfig`], wire up the store, limiter, input, and schedule tasks,
//! and hand control to the coordinator. On success the store's completion
//! response is the only thing written to standard output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Parser;

use barge::config::{UploadConfig, parse_metadata, parse_s3_uri};
use barge::coordinator::Coordinator;
use barge::input::{InputDispatcher, Interrupts, RawModeGuard, spawn_signal_task};
use barge::limiter::RateLimiter;
use barge::schedule::{self, Schedule};
use barge::store::ObjectStore;
use barge::store::aws::{AwsStore, validate_storage_class};
use barge::ui;
use barge::utils::{parse_filesize, parse_rate};

#[derive(Debug, Parser)]
#[command(
    name = "barge",
    version,
    about = "Upload a single large file to an S3-compatible store, resumably and rate-limited",
    after_help = "LocalPath must be a local file.\n\
                  S3Uri must have the format s3://<bucketname>/<key>.\n\n\
                  While uploading, press ? for the keyboard controls."
)]
struct Cli {
    /// Local file to upload.
    local_path: String,

    /// Destination, in the form s3://<bucket>/<key>.
    s3_uri: String,

    /// Bandwidth limit, e.g. "2.5m". "unlimited" disables throttling.
    #[arg(long)]
    bwlimit: Option<String>,

    /// Weekly rate schedule file; its active block overrides --bwlimit.
    #[arg(long, value_name = "FILE")]
    schedule: Option<PathBuf>,

    /// Part size, e.g. "16m" (binary units). Chosen automatically if omitted.
    #[arg(long, value_name = "SIZE")]
    part_size: Option<String>,

    /// Proceed even if the destination object already exists.
    #[arg(long)]
    force: bool,

    /// Compute the file digest and record it in SHA256SUMS when absent.
    #[arg(long)]
    compute_checksum: bool,

    /// Use a specific profile from your credential file.
    #[arg(long)]
    profile: Option<String>,

    /// A standard MIME type describing the format of the object data.
    #[arg(long)]
    content_type: Option<String>,

    /// Specifies caching behavior for the object.
    #[arg(long)]
    cache_control: Option<String>,

    /// Specifies presentational information for the object.
    #[arg(long)]
    content_disposition: Option<String>,

    /// Specifies what content encodings have been applied to the object.
    #[arg(long)]
    content_encoding: Option<String>,

    /// Specifies the language the content is in.
    #[arg(long)]
    content_language: Option<String>,

    /// The tag-set for the object, as URL query parameters.
    #[arg(long)]
    tagging: Option<String>,

    /// Metadata to store with the object, as key=value,key=value.
    #[arg(long)]
    metadata: Option<String>,

    /// Storage class, e.g. "STANDARD" or "DEEP_ARCHIVE".
    #[arg(long)]
    storage_class: Option<String>,

    /// Checksum algorithm the store should compute per part.
    #[arg(long)]
    checksum_algorithm: Option<String>,

    /// Server-side encryption to apply, e.g. "AES256" or "aws:kms".
    #[arg(long)]
    sse: Option<String>,

    /// KMS key id for aws:kms encryption.
    #[arg(long)]
    sse_kms_key_id: Option<String>,

    /// Algorithm for customer-provided encryption keys.
    #[arg(long)]
    sse_customer_algorithm: Option<String>,

    /// Customer-provided encryption key, base64 encoded.
    #[arg(long)]
    sse_customer_key: Option<String>,

    /// MD5 digest of the customer-provided key, base64 encoded.
    #[arg(long)]
    sse_customer_key_md5: Option<String>,

    /// Object-lock legal hold status ("ON" or "OFF").
    #[arg(long)]
    object_lock_legal_hold: Option<String>,

    /// Object-lock retention mode ("GOVERNANCE" or "COMPLIANCE").
    #[arg(long)]
    object_lock_mode: Option<String>,

    /// Object-lock retain-until date, RFC 3339.
    #[arg(long)]
    object_lock_retain_until: Option<String>,

    /// Confirm that the requester pays for the request ("requester").
    #[arg(long)]
    request_payer: Option<String>,

    /// The account ID of the expected bucket owner.
    #[arg(long)]
    expected_bucket_owner: Option<String>,

    /// Use the dualstack endpoint (also AWS_USE_DUALSTACK_ENDPOINT=true).
    #[arg(long)]
    dualstack: bool,

    /// Use the transfer-acceleration endpoint.
    #[arg(long)]
    accelerate: bool,

    /// Use path-style addressing (for S3-compatible stores).
    #[arg(long)]
    path_style: bool,

    /// Endpoint URL override (for S3-compatible stores).
    #[arg(long)]
    endpoint_url: Option<String>,
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_config(cli: &Cli) -> Result<UploadConfig> {
    if cli.local_path.starts_with("s3://") {
        bail!("copying files from S3 is not supported; LocalPath must be a local file");
    }
    let Some((bucket, key)) = parse_s3_uri(&cli.s3_uri) else {
        bail!("the destination must have the format s3://<bucket>/<key>");
    };

    let rate = match &cli.bwlimit {
        Some(limit) => parse_rate(limit)?,
        None => 0,
    };
    let part_size = cli.part_size.as_deref().map(parse_filesize).transpose()?;
    let metadata = match &cli.metadata {
        Some(spec) => parse_metadata(spec)?,
        None => Default::default(),
    };
    if let Some(storage_class) = &cli.storage_class {
        validate_storage_class(storage_class)?;
    }

    let mut config = UploadConfig {
        bucket,
        key,
        file: PathBuf::from(&cli.local_path),
        part_size,
        rate,
        schedule: cli.schedule.clone(),
        force: cli.force,
        compute_checksum: cli.compute_checksum,
        profile: cli.profile.clone(),
        content_type: cli.content_type.clone(),
        cache_control: cli.cache_control.clone(),
        content_disposition: cli.content_disposition.clone(),
        content_encoding: cli.content_encoding.clone(),
        content_language: cli.content_language.clone(),
        tagging: cli.tagging.clone(),
        metadata,
        storage_class: cli.storage_class.clone(),
        checksum_algorithm: cli.checksum_algorithm.clone(),
        sse: cli.sse.clone(),
        sse_kms_key_id: cli.sse_kms_key_id.clone(),
        sse_customer_algorithm: cli.sse_customer_algorithm.clone(),
        sse_customer_key: cli.sse_customer_key.clone(),
        sse_customer_key_md5: cli.sse_customer_key_md5.clone(),
        object_lock_legal_hold: cli.object_lock_legal_hold.clone(),
        object_lock_mode: cli.object_lock_mode.clone(),
        object_lock_retain_until: cli.object_lock_retain_until.clone(),
        request_payer: cli.request_payer.clone(),
        expected_bucket_owner: cli.expected_bucket_owner.clone(),
        dualstack: cli.dualstack,
        accelerate: cli.accelerate,
        path_style: cli.path_style,
        endpoint_url: cli.endpoint_url.clone(),
        region_default: String::new(),
        mfa_secret: None,
    };
    config.apply_env();
    Ok(config)
}

async fn run(cli: Cli) -> Result<serde_json::Value> {
    let config = build_config(&cli)?;
    let validation = config.validate()?;
    for warning in &validation.warnings {
        ui::warning(warning);
    }
    if config.mfa_secret.is_some() {
        tracing::debug!("TOTP secret provided; the credential provider may use it for MFA");
    }

    let schedule = config
        .schedule
        .as_deref()
        .map(Schedule::load)
        .transpose()
        .context("failed to load the schedule")?;

    let store = AwsStore::connect(&config).await?;
    let region = store.bucket_region().await?;
    tracing::debug!(%region, "store connected");

    // With a schedule, the rate in force right now wins over --bwlimit.
    let initial_rate = schedule
        .as_ref()
        .map_or(config.rate, |s| s.current_rate(&chrono::Local::now()));
    let limiter = RateLimiter::new(initial_rate, store.is_unencrypted());

    let interrupts = Arc::new(Interrupts::default());
    spawn_signal_task(Arc::clone(&interrupts));
    let _raw_mode = RawModeGuard::enable();
    let dispatcher = InputDispatcher::spawn(Arc::clone(&interrupts));

    if let Some(schedule) = schedule {
        tokio::spawn(schedule::drive(
            schedule,
            Arc::clone(&limiter),
            initial_rate,
        ));
    }

    let store: Arc<dyn ObjectStore> = Arc::new(store);
    let coordinator = Coordinator::new(
        store,
        config,
        limiter,
        dispatcher.into_events(),
        interrupts,
    );
    coordinator.run().await
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(response) => {
            match serde_json::to_string_pretty(&response) {
                Ok(json) => println!("{json}"),
                Err(err) => eprintln!("Error serializing the response: {err}"),
            }
            ui::notice("All done!");
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

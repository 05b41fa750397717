use crate::{
    errors::{TransferError, TransferResult},
    services::retry::RetryPolicy,
    storage::s3::S3Options,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const MB: u64 = 1024 * 1024;

/// How the planner checks whether a remote destination already holds an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    /// One HEAD request per object.
    Head,
    /// One recursive listing of the destination before the run.
    List,
}

/// The values the transfer engine consumes.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Object gate size `W`; parts run `2W` wide and listings `4W` wide.
    pub workers: usize,

    /// Objects at or above this size are chunked and resumable.
    pub resumable_threshold: u64,
    pub chunk_size: u64,
    pub transfer_metadata: bool,
    pub skip_compare: bool,
    pub compare_mode: CompareMode,
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resumable_threshold: 50 * MB,
            chunk_size: 5 * MB,
            transfer_metadata: false,
            skip_compare: false,
            compare_mode: CompareMode::Head,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> TransferResult<()> {
        if self.workers == 0 {
            return Err(TransferError::FatalConfig("worker count must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(TransferError::FatalConfig("chunk size must be positive".into()));
        }
        Ok(())
    }
}

/// A parsed FROM_URL / TO_URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointUrl {
    S3 { bucket: String, prefix: String },
    Local(PathBuf),
    Http(String),
}

impl EndpointUrl {
    pub fn parse(url: &str) -> TransferResult<Self> {
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(TransferError::FatalConfig(format!("missing bucket in `{}`", url)));
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.trim_matches('/').to_string(),
            });
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Self::Http(url.to_string()));
        }
        if url.is_empty() {
            return Err(TransferError::FatalConfig("empty location".into()));
        }
        Ok(Self::Local(PathBuf::from(url)))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub from_url: String,
    pub to_url: String,
    pub from: S3Options,
    pub to: S3Options,
    pub http_timeout: Duration,
    pub transfer: TransferConfig,
    pub db_path: PathBuf,
    pub ignore_list_path: PathBuf,

    /// FROM_URL names a local file of HTTP URLs, one per line.
    pub url_list: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked transfer between S3, local disk and HTTP")]
pub struct Args {
    /// Source: s3://bucket/prefix, a local path, or an http(s) URL
    pub from_url: String,

    /// Destination: s3://bucket/prefix or a local path
    pub to_url: String,

    /// AWS profile for the source
    #[arg(long)]
    pub from_profile: Option<String>,

    /// AWS profile for the destination
    #[arg(long)]
    pub to_profile: Option<String>,

    /// Custom endpoint for an S3-compatible source
    #[arg(long)]
    pub from_endpoint: Option<String>,

    /// Custom endpoint for an S3-compatible destination
    #[arg(long)]
    pub to_endpoint: Option<String>,

    #[arg(long)]
    pub from_region: Option<String>,

    #[arg(long)]
    pub to_region: Option<String>,

    /// Storage class for written objects (overrides S3TRANS_STORAGE_CLASS)
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Canned ACL for written objects (overrides S3TRANS_ACL)
    #[arg(long)]
    pub acl: Option<String>,

    /// Read the source without signing requests
    #[arg(long)]
    pub no_sign_request: bool,

    /// Pay for requester-pays source buckets
    #[arg(long)]
    pub request_payer: bool,

    /// Compare against one listing of the destination instead of per-object HEAD
    #[arg(short = 'l', long)]
    pub list_target: bool,

    /// Transfer everything without comparing against the destination
    #[arg(short = 's', long)]
    pub skip_compare: bool,

    /// Copy object metadata and compare it when deciding to skip
    #[arg(long)]
    pub transfer_metadata: bool,

    /// Per-request timeout in seconds (overrides S3TRANS_HTTP_TIMEOUT)
    #[arg(long)]
    pub http_timeout: Option<u64>,

    /// Attempts per operation, including the first (overrides S3TRANS_MAX_RETRIES)
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Base retry delay in milliseconds (overrides S3TRANS_RETRY_DELAY_MS)
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Size in MB from which objects are chunked (overrides S3TRANS_RESUMABLE_THRESHOLD)
    #[arg(long)]
    pub resumable_threshold: Option<u64>,

    /// Chunk size in MB (overrides S3TRANS_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Concurrent objects; parts run twice as wide (overrides S3TRANS_NUM_WORKERS)
    #[arg(short = 'n', long)]
    pub num_workers: Option<usize>,

    /// Checkpoint database file (overrides S3TRANS_DB_PATH)
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// File of key prefixes to skip (overrides S3TRANS_IGNORE_LIST_PATH)
    #[arg(long)]
    pub ignore_list_path: Option<PathBuf>,

    /// Treat FROM_URL as a file listing HTTP URLs
    #[arg(long)]
    pub url_list: bool,
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// `value` megabytes in bytes.
fn megabytes(name: &str, value: u64) -> Result<u64> {
    value
        .checked_mul(MB)
        .with_context(|| format!("{} of {} MB does not fit in 64 bits", name, value))
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_workers = env_or("S3TRANS_NUM_WORKERS", 4usize)?;
        let env_chunk = env_or("S3TRANS_CHUNK_SIZE", 5u64)?;
        let env_threshold = env_or("S3TRANS_RESUMABLE_THRESHOLD", 50u64)?;
        let env_retries = env_or("S3TRANS_MAX_RETRIES", 5usize)?;
        let env_delay = env_or("S3TRANS_RETRY_DELAY_MS", 1000u64)?;
        let env_timeout = env_or("S3TRANS_HTTP_TIMEOUT", 30u64)?;
        let env_db = env_or("S3TRANS_DB_PATH", PathBuf::from("./s3trans.db"))?;
        let env_ignore = env_or(
            "S3TRANS_IGNORE_LIST_PATH",
            PathBuf::from("./s3trans_ignore.list"),
        )?;
        let env_storage_class = env::var("S3TRANS_STORAGE_CLASS").ok();
        let env_acl = env::var("S3TRANS_ACL").ok();

        // --- Merge ---
        let http_timeout = Duration::from_secs(args.http_timeout.unwrap_or(env_timeout));
        let retry = RetryPolicy::new(
            args.max_retries.unwrap_or(env_retries),
            Duration::from_millis(args.retry_delay_ms.unwrap_or(env_delay)),
        );

        let compare_mode = if args.list_target && !args.skip_compare && !args.transfer_metadata {
            CompareMode::List
        } else {
            CompareMode::Head
        };

        let transfer = TransferConfig {
            workers: args.num_workers.unwrap_or(env_workers),
            resumable_threshold: megabytes(
                "resumable threshold",
                args.resumable_threshold.unwrap_or(env_threshold),
            )?,
            chunk_size: megabytes("chunk size", args.chunk_size.unwrap_or(env_chunk))?,
            transfer_metadata: args.transfer_metadata,
            skip_compare: args.skip_compare,
            compare_mode,
            retry,
        };

        let from = S3Options {
            profile: args.from_profile,
            region: args.from_region,
            endpoint: args.from_endpoint,
            no_sign_request: args.no_sign_request,
            request_payer: args.request_payer,
            storage_class: None,
            acl: None,
            timeout: http_timeout,
        };
        let to = S3Options {
            profile: args.to_profile,
            region: args.to_region,
            endpoint: args.to_endpoint,
            no_sign_request: false,
            request_payer: false,
            storage_class: args.storage_class.or(env_storage_class),
            acl: args.acl.or(env_acl),
            timeout: http_timeout,
        };

        Ok(Self {
            from_url: args.from_url,
            to_url: args.to_url,
            from,
            to,
            http_timeout,
            transfer,
            db_path: args.db_path.unwrap_or(env_db),
            ignore_list_path: args.ignore_list_path.unwrap_or(env_ignore),
            url_list: args.url_list,
        })
    }
}

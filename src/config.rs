use crate::models::guard::GuardMarker;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which marker keeps a bucket resource from being deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GuardKind {
    Finalizer,
    Annotation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub group: String,
    pub api_version: String,
    pub kind: String,
    pub plural: String,
    pub namespace: Option<String>,
    pub guard: GuardKind,
    pub finalizer: String,
    pub annotation: String,
    pub resync: Option<Duration>,
    pub concurrency: usize,
    pub page_size: usize,
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_path_style: bool,
    pub log_format: LogFormat,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Empties remote buckets before their bucket resources are deleted"
)]
pub struct Args {
    /// Probe server host (overrides BUCKET_REAPER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Probe server port (overrides BUCKET_REAPER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// API group of the bucket resource (overrides BUCKET_REAPER_GROUP)
    #[arg(long)]
    pub group: Option<String>,

    /// API version of the bucket resource (overrides BUCKET_REAPER_VERSION)
    #[arg(long)]
    pub api_version: Option<String>,

    /// Kind of the bucket resource (overrides BUCKET_REAPER_KIND)
    #[arg(long)]
    pub kind: Option<String>,

    /// Plural resource name (overrides BUCKET_REAPER_PLURAL)
    #[arg(long)]
    pub plural: Option<String>,

    /// Only watch this namespace (overrides BUCKET_REAPER_NAMESPACE)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Guard strategy (overrides BUCKET_REAPER_GUARD)
    #[arg(long, value_enum)]
    pub guard: Option<GuardKind>,

    /// Finalizer token owned by this controller (overrides BUCKET_REAPER_FINALIZER)
    #[arg(long)]
    pub finalizer: Option<String>,

    /// Opt-in annotation for the annotation guard (overrides BUCKET_REAPER_ANNOTATION)
    #[arg(long)]
    pub annotation: Option<String>,

    /// Seconds between full re-lists, 0 disables (overrides BUCKET_REAPER_RESYNC_SECS)
    #[arg(long)]
    pub resync_secs: Option<u64>,

    /// Notifications handled at once (overrides BUCKET_REAPER_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Keys per listing page, at most 1000 (overrides BUCKET_REAPER_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Custom S3 endpoint URL (overrides BUCKET_REAPER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 region (overrides BUCKET_REAPER_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Use path-style bucket addressing (overrides BUCKET_REAPER_S3_PATH_STYLE)
    #[arg(long)]
    pub s3_path_style: bool,

    /// Log output format (overrides BUCKET_REAPER_LOG_FORMAT)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge parsed args over values looked up with `lookup`. CLI wins.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());
        let optional = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let port = parsed(&lookup, "BUCKET_REAPER_PORT", 8080u16)?;
        let resync_secs = parsed(&lookup, "BUCKET_REAPER_RESYNC_SECS", 30u64)?;
        let concurrency = parsed(&lookup, "BUCKET_REAPER_CONCURRENCY", 4usize)?;
        let page_size = parsed(&lookup, "BUCKET_REAPER_PAGE_SIZE", 1000usize)?;
        let path_style = parsed(&lookup, "BUCKET_REAPER_S3_PATH_STYLE", false)?;
        let guard = value_enum(&lookup, "BUCKET_REAPER_GUARD", GuardKind::Finalizer)?;
        let log_format = value_enum(&lookup, "BUCKET_REAPER_LOG_FORMAT", LogFormat::Text)?;

        let resync_secs = args.resync_secs.unwrap_or(resync_secs);

        Ok(Self {
            host: args
                .host
                .unwrap_or_else(|| text("BUCKET_REAPER_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(port),
            group: args
                .group
                .unwrap_or_else(|| text("BUCKET_REAPER_GROUP", "s3.services.k8s.aws")),
            api_version: args
                .api_version
                .unwrap_or_else(|| text("BUCKET_REAPER_VERSION", "v1alpha1")),
            kind: args
                .kind
                .unwrap_or_else(|| text("BUCKET_REAPER_KIND", "Bucket")),
            plural: args
                .plural
                .unwrap_or_else(|| text("BUCKET_REAPER_PLURAL", "buckets")),
            namespace: args
                .namespace
                .or_else(|| optional("BUCKET_REAPER_NAMESPACE")),
            guard: args.guard.unwrap_or(guard),
            finalizer: args.finalizer.unwrap_or_else(|| {
                text("BUCKET_REAPER_FINALIZER", "s3.services.k8s.aws/empty-bucket")
            }),
            annotation: args.annotation.unwrap_or_else(|| {
                text("BUCKET_REAPER_ANNOTATION", "s3.services.k8s.aws/empty-on-delete")
            }),
            resync: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            concurrency: args.concurrency.unwrap_or(concurrency).max(1),
            page_size: args.page_size.unwrap_or(page_size),
            s3_endpoint: args
                .s3_endpoint
                .or_else(|| optional("BUCKET_REAPER_S3_ENDPOINT")),
            s3_region: args.s3_region.or_else(|| optional("BUCKET_REAPER_S3_REGION")),
            s3_path_style: args.s3_path_style || path_style,
            log_format: args.log_format.unwrap_or(log_format),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn guard_marker(&self) -> GuardMarker {
        match self.guard {
            GuardKind::Finalizer => GuardMarker::Finalizer(self.finalizer.clone()),
            GuardKind::Annotation => GuardMarker::Annotation(self.annotation.clone()),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

fn value_enum<T: ValueEnum>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(value) => <T as ValueEnum>::from_str(value.trim(), true)
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        None => Ok(default),
    }
}

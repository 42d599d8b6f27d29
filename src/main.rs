//! backup-inventory - check for and delete backups in object storage
//!
//! Thin command-line wrapper around the library: resolves the location from
//! flags, `BACKUP_INVENTORY_*` environment variables and an optional TOML
//! settings file, runs one command, prints its result as JSON on stdout and
//! logs to stderr.
//!
//! Exit codes: 0 on success, 1 on error, 3 when the backup is not found
//! (`exists`) or never reached the expected state (`wait`).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup_inventory::verify::{self, PresencePolicy};
use backup_inventory::{
    metrics, storage, BackendKind, BackupLocation, BackupLocator, BackupPurger, InventoryError,
    LocationConfig, Settings,
};

const EXIT_NOT_FOUND: u8 = 3;

#[derive(Parser)]
#[command(name = "backup-inventory")]
#[command(about = "Check for and delete backups in S3, Azure Blob and GCS buckets")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    location: LocationArgs,

    /// Log output format
    #[arg(long, env = "BACKUP_INVENTORY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, env = "BACKUP_INVENTORY_PRINT_METRICS")]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

/// Where the backups live; each flag overrides the settings file
#[derive(Args)]
struct LocationArgs {
    /// TOML settings file
    #[arg(long, env = "BACKUP_INVENTORY_SETTINGS_FILE")]
    settings_file: Option<PathBuf>,

    /// Storage provider: aws (or minio), azure, gcp
    #[arg(long, env = "BACKUP_INVENTORY_PROVIDER")]
    provider: Option<BackendKind>,

    /// Provider credentials file
    #[arg(long, env = "BACKUP_INVENTORY_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    /// Bucket (or Azure container)
    #[arg(long, env = "BACKUP_INVENTORY_BUCKET")]
    bucket: Option<String>,

    /// Prefix the backups live under
    #[arg(long, env = "BACKUP_INVENTORY_PREFIX")]
    prefix: Option<String>,

    /// Sub-directory between prefix and backup folders, e.g. `backups`
    #[arg(long, env = "BACKUP_INVENTORY_SUBDIR")]
    subdir: Option<String>,

    /// Location config, `key=value,key=value`
    #[arg(long, env = "BACKUP_INVENTORY_CONFIG")]
    config: Option<String>,

    /// Deadline for the whole command in seconds, 0 for none
    #[arg(long, env = "BACKUP_INVENTORY_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether a backup exists
    Exists {
        /// Backup name, matched as a substring of the folder name
        #[arg(long)]
        backup: String,
    },
    /// Delete every object of a backup
    Purge {
        /// Backup name, used as the folder under the prefix
        #[arg(long)]
        backup: String,
    },
    /// Poll until a backup is present or absent
    Wait {
        #[arg(long)]
        backup: String,
        #[arg(long, value_enum)]
        state: Presence,
        #[arg(long, default_value_t = 5)]
        attempts: u32,
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
enum Presence {
    Present,
    Absent,
}

/// Location after merging flags, environment and settings file
struct Resolved {
    kind: BackendKind,
    credentials_file: Option<PathBuf>,
    location: BackupLocation,
    config: LocationConfig,
    timeout: Option<Duration>,
}

#[derive(Serialize)]
struct ExistsReport<'a> {
    backup: &'a str,
    found: bool,
}

#[derive(Serialize)]
struct WaitReport<'a> {
    backup: &'a str,
    state: Presence,
    attempts: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(e) = metrics::init_metrics() {
        warn!(error = %e, "Failed to register metrics");
    }

    let result = run(&cli).await;

    if cli.print_metrics {
        match metrics::render() {
            Ok(text) => eprint!("{}", text),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
    }

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let resolved = resolve(&cli.location)?;
    info!(
        provider = %resolved.kind,
        bucket = %resolved.location.bucket,
        prefix = %resolved.location.effective_prefix(),
        "Location resolved"
    );

    let backend = storage::connect(
        resolved.kind,
        resolved.credentials_file.as_deref(),
        &resolved.config,
    )
    .await
    .context("failed to connect to the storage backend")?;

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn(cancel_on_interrupt(cancel.clone(), resolved.timeout));
    let location = &resolved.location;

    let outcome = match &cli.command {
        Command::Exists { backup } => {
            let found = BackupLocator::new(backend)
                .with_cancellation(cancel)
                .exists(location, backup)
                .await
                .with_context(|| format!("failed to look up backup {}", backup))?;
            print_json(&ExistsReport { backup, found })?;
            if found {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_NOT_FOUND)
            }
        }
        Command::Purge { backup } => {
            let report = BackupPurger::new(backend)
                .with_cancellation(cancel)
                .purge(location, backup)
                .await
                .with_context(|| format!("failed to purge backup {}", backup))?;
            print_json(&report)?;
            ExitCode::SUCCESS
        }
        Command::Wait {
            backup,
            state,
            attempts,
            interval_secs,
        } => {
            let locator = BackupLocator::new(backend).with_cancellation(cancel);
            let policy = PresencePolicy {
                attempts: *attempts,
                interval: Duration::from_secs(*interval_secs),
            };
            let expected = matches!(state, Presence::Present);
            match verify::wait_for_presence(&locator, location, backup, expected, policy).await {
                Ok(attempts) => {
                    print_json(&WaitReport {
                        backup,
                        state: *state,
                        attempts,
                    })?;
                    ExitCode::SUCCESS
                }
                Err(e @ InventoryError::PresenceTimeout { .. }) => {
                    warn!(error = %e, "Backup did not reach the expected state");
                    ExitCode::from(EXIT_NOT_FOUND)
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to wait for backup {}", backup))
                }
            }
        }
    };

    watchdog.abort();
    Ok(outcome)
}

fn resolve(args: &LocationArgs) -> Result<Resolved> {
    let settings = match &args.settings_file {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let kind = args
        .provider
        .or(settings.provider)
        .context("no provider given; pass --provider or set `provider` in the settings file")?;
    let bucket = args
        .bucket
        .clone()
        .or(settings.bucket)
        .context("no bucket given; pass --bucket or set `bucket` in the settings file")?;
    let prefix = args.prefix.clone().or(settings.prefix).unwrap_or_default();

    let overrides = LocationConfig::parse(args.config.as_deref().unwrap_or(""))
        .context("invalid --config")?;
    let config = settings.config.merge(overrides);

    let mut location = BackupLocation::new(bucket, prefix);
    if let Some(subdir) = args.subdir.clone().or(settings.subdir) {
        location = location.with_subdir(subdir);
    }

    let timeout_secs = args.timeout_secs.unwrap_or(settings.timeout_secs);

    Ok(Resolved {
        kind,
        credentials_file: args.credentials_file.clone().or(settings.credentials_file),
        location,
        config,
        timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
    })
}

/// Cancel `cancel` on Ctrl-C or once `timeout` has elapsed
async fn cancel_on_interrupt(cancel: CancellationToken, timeout: Option<Duration>) {
    let interrupted = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, cancelling"),
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl-C handler");
                std::future::pending::<()>().await
            }
        }
    };
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupted => {}
        _ = deadline => warn!(?timeout, "Deadline reached, cancelling"),
    }
    cancel.cancel();
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{}", out);
    Ok(())
}

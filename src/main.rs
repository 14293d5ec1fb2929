use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use portal_scan_lib::api::{HttpTransport, Transport};
use portal_scan_lib::config::{CheckerConfig, DnsMode, ProbeMode};
use portal_scan_lib::import::{import_file, normalize_identifier};
use portal_scan_lib::model::normalize_endpoint;
use portal_scan_lib::player::probe_from_config;
use portal_scan_lib::scheduler::{SchedulerSettings, ValidationScheduler};
use portal_scan_lib::session::HttpPortalFactory;
use portal_scan_lib::setup;
use portal_scan_lib::store::{CredentialStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(version, about = "Validate portal identifiers against their portals", long_about = None)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate stored identifiers
    Check {
        /// Keep checking after an endpoint has a working identifier
        #[arg(long)]
        exhaustive: bool,
        /// Concurrent checks per endpoint
        #[arg(long)]
        workers: Option<usize>,
        /// Channel samples per relevant genre
        #[arg(long)]
        samples: Option<usize>,
        /// Relevant genres examined per identifier
        #[arg(long)]
        genre_cap: Option<usize>,
        #[arg(long, value_enum)]
        probe: Option<ProbeMode>,
        /// Only endpoints without any working identifier
        #[arg(long)]
        unresolved_only: bool,
        /// Only this endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Add one identifier
    Add {
        endpoint: String,
        identifier: String,
        /// Expiration date (YYYY-MM-DD)
        #[arg(long)]
        expires: Option<NaiveDate>,
    },
    /// Import scanner output
    Import { file: PathBuf },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "portal_scan=debug,portal_scan_lib=debug"
    } else {
        "portal_scan=info,portal_scan_lib=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(config: &CheckerConfig, db: Option<PathBuf>) -> Result<Arc<SqliteStore>, anyhow::Error> {
    let path = match db {
        Some(path) => path,
        None => config.database_path()?,
    };
    info!("Using database {}", path.display());
    Ok(Arc::new(SqliteStore::open(&path, config.max_failed_attempts)?))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => CheckerConfig::load_from(path)?,
        None => CheckerConfig::load()?,
    };
    let store = open_store(&config, args.db.clone())?;

    match args.command {
        Command::Check {
            exhaustive,
            workers,
            samples,
            genre_cap,
            probe,
            unresolved_only,
            endpoint,
        } => {
            config.exhaustive |= exhaustive;
            if let Some(n) = workers {
                config.pool_width = n;
            }
            if let Some(n) = samples {
                config.samples_per_genre = n;
            }
            if let Some(n) = genre_cap {
                config.max_relevant_genres = n;
            }
            if let Some(mode) = probe {
                config.probe = mode;
            }
            setup::check_probe_dependency(&config)?;

            let transport: Arc<dyn Transport> = match config.dns {
                DnsMode::System => Arc::new(HttpTransport::new()),
                DnsMode::Hickory => Arc::new(HttpTransport::new_with_hickory()?),
            };
            let scheduler = ValidationScheduler::new(
                store.clone(),
                Arc::new(HttpPortalFactory::from_config(transport, &config)),
                probe_from_config(&config),
                SchedulerSettings::from_config(&config),
            );

            let mut endpoints = if unresolved_only {
                store.endpoints_without_success()?
            } else {
                store.list_endpoints()?
            };
            if let Some(url) = endpoint {
                let wanted = normalize_endpoint(&url);
                endpoints.retain(|e| e.url == wanted);
                if endpoints.is_empty() {
                    return Err(anyhow::anyhow!("Endpoint {} is not in the database", wanted));
                }
            }

            let summary = scheduler.run_endpoints(&endpoints).await?;
            println!(
                "{} of {} endpoints have a working identifier. {}",
                summary.working_endpoints(),
                summary.endpoints.len(),
                summary.counts
            );
        }
        Command::Add {
            endpoint,
            identifier,
            expires,
        } => {
            let identifier = normalize_identifier(&identifier)
                .ok_or_else(|| anyhow::anyhow!("'{}' is not a hardware address", identifier))?;
            if store.add_identifier(&endpoint, &identifier, expires)? {
                println!("Added {} to {}", identifier, normalize_endpoint(&endpoint));
            } else {
                println!("{} already present for {}", identifier, normalize_endpoint(&endpoint));
            }
        }
        Command::Import { file } => {
            let report = import_file(store.as_ref(), &file)?;
            println!(
                "Imported {}: {} added, {} already present, {} malformed blocks skipped",
                file.display(),
                report.added,
                report.existing,
                report.skipped
            );
        }
    }

    Ok(())
}

//! Event catalog data-quality runner (evcat-dq) - Main entry point
//!
//! Runs the canonicalization and data-quality batch jobs against the catalog
//! database: ingestion, recurrence detection, signal normalization, duplicate
//! resolution and the hierarchy audit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use evcat_common::config::{prepare_root_folder, resolve_root_folder, TomlConfig};
use evcat_common::db::{init_database, SourceKind};
use evcat_dq::fingerprint::{canonical_date, fingerprint};
use evcat_dq::ingest::{CandidateFeed, JsonLinesFeed};
use evcat_dq::runner::DqRunner;
use evcat_dq::store::{CatalogStore, NewSource};
use evcat_dq::{DqParams, JobOptions};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for evcat-dq
#[derive(Parser, Debug)]
#[command(name = "evcat-dq")]
#[command(about = "Canonicalization and data-quality jobs for the event catalog")]
#[command(version)]
struct Args {
    /// Root folder holding the catalog database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Explicit database file (overrides the root folder)
    #[arg(long, global = true, env = "EVCAT_DATABASE")]
    database: Option<PathBuf>,

    /// Compute and report without writing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Date treated as today (defaults to the local date)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert candidates from a JSON-lines file
    Ingest {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Resolve cross-source duplicates
    Dedupe,
    /// Detect recurring shows among unlinked events
    Recurrence,
    /// Normalize show signals
    Normalize,
    /// Audit and repair festival program series
    Audit,
    /// Run every job in data-flow order
    RunAll {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print the fingerprint of a title / anchor / date
    Fingerprint {
        #[arg(long)]
        title: String,
        #[arg(long)]
        anchor: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Manage the source registry
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
}

#[derive(Subcommand, Debug)]
enum SourceAction {
    /// Register or update a source
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        slug: String,
        #[arg(long, value_enum, default_value_t = KindArg::Aggregator)]
        kind: KindArg,
        /// Curated rank; lower is more authoritative
        #[arg(long)]
        priority: Option<i64>,
        #[arg(long)]
        inactive: bool,
        /// Owning distribution channel
        #[arg(long)]
        channel: Option<i64>,
        #[arg(long)]
        sensitive: bool,
    },
    /// List registered sources
    List,
}

/// Source kind as accepted on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    Venue,
    Festival,
    Promoter,
    Ticketing,
    Aggregator,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Venue => SourceKind::Venue,
            KindArg::Festival => SourceKind::Festival,
            KindArg::Promoter => SourceKind::Promoter,
            KindArg::Ticketing => SourceKind::Ticketing,
            KindArg::Aggregator => SourceKind::Aggregator,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evcat_dq=info,evcat_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Command::Fingerprint { title, anchor, date } = &args.command {
        println!("{}", fingerprint(title, anchor, &canonical_date(*date)));
        return Ok(());
    }

    let toml_config = TomlConfig::load().context("Failed to load config file")?;
    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => {
            let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
            prepare_root_folder(&root_folder).context("Failed to prepare root folder")?
        }
    };
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    let params = DqParams::resolve(&pool, &toml_config)
        .await
        .context("Failed to resolve data-quality parameters")?;
    let runner = DqRunner::new(pool, params);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    let opts = JobOptions {
        dry_run: args.dry_run,
        cancel,
    };
    let today = args
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    if opts.dry_run {
        info!("Dry run: no changes will be written");
    }

    let result = run_command(&args, &runner, &opts, today).await;
    if let Err(e) = &result {
        error!("Job failed: {:#}", e);
    }
    result
}

async fn run_command(args: &Args, runner: &DqRunner, opts: &JobOptions, today: NaiveDate) -> Result<()> {
    match &args.command {
        Command::Ingest { file } => {
            let mut feed = open_feed(file).await?;
            let stats = runner.ingest(&mut feed, opts).await?;
            print_report(args.json, &stats, &stats.display_string(), stats.cancelled)?;
        }
        Command::Dedupe => {
            let stats = runner.dedupe(today, opts).await?;
            print_report(args.json, &stats, &stats.display_string(), stats.cancelled)?;
        }
        Command::Recurrence => {
            let stats = runner.recurrence(today, opts).await?;
            print_report(args.json, &stats, &stats.display_string(), stats.cancelled)?;
        }
        Command::Normalize => {
            let stats = runner.normalize(today, opts).await?;
            print_report(args.json, &stats, &stats.display_string(), stats.cancelled)?;
        }
        Command::Audit => {
            let stats = runner.audit(opts).await?;
            print_report(args.json, &stats, &stats.display_string(), stats.cancelled)?;
        }
        Command::RunAll { file } => {
            let stats = match file {
                Some(file) => {
                    let mut feed = open_feed(file).await?;
                    runner.run_all(Some(&mut feed as &mut dyn CandidateFeed), today, opts).await?
                }
                None => runner.run_all(None, today, opts).await?,
            };
            print_report(args.json, &stats, &stats.display_string(), stats.cancelled)?;
        }
        Command::Source { action } => run_source_action(runner, action, args.json).await?,
        Command::Fingerprint { .. } => {}
    }

    Ok(())
}

async fn open_feed(file: &Path) -> Result<JsonLinesFeed> {
    JsonLinesFeed::open(file)
        .await
        .with_context(|| format!("Failed to open candidate file {}", file.display()))
}

async fn run_source_action(runner: &DqRunner, action: &SourceAction, json: bool) -> Result<()> {
    match action {
        SourceAction::Add {
            name,
            slug,
            kind,
            priority,
            inactive,
            channel,
            sensitive,
        } => {
            let source = runner
                .store()
                .upsert_source(&NewSource {
                    name: name.clone(),
                    slug: slug.clone(),
                    kind: (*kind).into(),
                    priority: *priority,
                    is_active: !inactive,
                    owner_channel_id: *channel,
                    is_sensitive: *sensitive,
                })
                .await
                .context("Failed to save source")?;
            let summary = format!("source {} ({}) saved as id {}", source.slug, source.kind.as_str(), source.id);
            print_report(json, &source, &summary, false)?;
        }
        SourceAction::List => {
            let sources = runner.store().sources().await.context("Failed to list sources")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sources)?);
            } else {
                for source in &sources {
                    println!(
                        "{:>4}  {:<24} {:<11} priority={} active={}",
                        source.id,
                        source.slug,
                        source.kind.as_str(),
                        evcat_dq::ranking::source_priority(source),
                        source.is_active
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_report<T: Serialize>(json: bool, report: &T, summary: &str, cancelled: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", summary);
    }
    if cancelled {
        warn!("Job was cancelled; report is partial");
    }
    Ok(())
}

/// Cancel running jobs on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling after the current unit"),
        _ = terminate => info!("Received terminate signal, cancelling after the current unit"),
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_add(kind: &str) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(["evcat-dq", "source", "add", "--name", "Blue Note", "--slug", "blue-note", "--kind", kind])
    }

    #[test]
    fn test_source_kind_is_validated() {
        let args = source_add("venue").unwrap();
        match args.command {
            Command::Source { action: SourceAction::Add { kind, .. } } => {
                assert_eq!(SourceKind::from(kind), SourceKind::Venue);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let err = source_add("venu").unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_source_kind_defaults_to_aggregator() {
        let args = Args::try_parse_from(["evcat-dq", "source", "add", "--name", "Listings", "--slug", "listings"]).unwrap();
        match args.command {
            Command::Source { action: SourceAction::Add { kind, .. } } => assert_eq!(kind, KindArg::Aggregator),
            other => panic!("unexpected command {:?}", other),
        }
    }
}

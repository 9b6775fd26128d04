//! Course catalog crawler CLI
//!
//! Local execution entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use catalog_crawler::{
    error::Result,
    models::{Config, EntityKind, TermStatus},
    pipeline::{CatalogJob, Crawler},
    source::HttpSource,
    storage::{CatalogStore, LocalStore},
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Course catalog crawler
#[derive(Parser, Debug)]
#[command(
    name = "crawler",
    version,
    about = "Crawl a course registration site into a local catalog"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl terms and reconcile them into the catalog
    Crawl {
        /// Term code to crawl; repeatable (default: crawler.terms, else every listed term)
        #[arg(long = "term")]
        terms: Vec<String>,
    },

    /// Fetch and print the term list
    Terms,

    /// Validate the configuration file
    Validate,

    /// Show catalog entity counts
    Info,
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let config = match loaded {
        Ok(config) => config,
        Err(e) if matches!(cli.command, Command::Validate) => {
            log::error!("Config load failed from {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            log::warn!(
                "Config load failed from {}: {}. Using defaults.",
                cli.config.display(),
                e
            );
            Config::default()
        }
    };

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// An interrupted crawl is not a clean one.
fn crawl_succeeded(status: TermStatus) -> bool {
    matches!(status, TermStatus::Completed | TermStatus::Partial)
}

async fn run(command: Command, config: Config) -> Result<ExitCode> {
    let storage_dir = config.storage_dir(Path::new("."));

    match command {
        Command::Crawl { terms } => {
            config.validate()?;
            let terms = if terms.is_empty() {
                config.crawler.terms.clone()
            } else {
                terms
            };

            let source = Arc::new(HttpSource::new(&config.source)?);
            let store = Arc::new(LocalStore::open(&storage_dir).await?);
            let job = CatalogJob::new(source, Arc::clone(&store), &config.crawler);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, cancelling job");
                    on_ctrl_c.cancel();
                }
            });

            let report = job.run(&terms, &cancel).await;
            let path = store.write_report(&report).await?;

            for term in &report.terms {
                log::info!(
                    "{} {}: created [{}], updated [{}], retired [{}], {} ambiguities, {} failures",
                    term.term_code,
                    term.status,
                    term.created,
                    term.updated,
                    term.retired,
                    term.ambiguities.len(),
                    term.failures.len()
                );
            }
            log::info!("Report written to {}", path.display());

            if !crawl_succeeded(report.status) {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Terms => {
            let source = Arc::new(HttpSource::new(&config.source)?);
            let crawler = Crawler::new(source, &config.crawler);
            let terms = crawler
                .fetch_terms(&CancellationToken::new())
                .await?;

            for term in terms {
                println!("{}\t{}", term.code, term.name.unwrap_or_default());
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            config.validate()?;
            log::info!("Config OK");
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage_dir.display());
            let store = LocalStore::open(&storage_dir).await?;
            let catalog = store.snapshot().await?;

            if catalog.is_empty() {
                log::info!("No catalog found yet.");
            } else {
                for count in catalog.counts() {
                    let retired = match count.kind {
                        EntityKind::Class | EntityKind::Meeting => {
                            format!(" ({} retired)", count.retired)
                        }
                        _ => String::new(),
                    };
                    println!("{:<12}{}{}", count.kind.as_str(), count.active, retired);
                }
            }

            if let Some(report) = store.load_report().await? {
                log::info!(
                    "Last job: {} at {} ({} terms)",
                    report.status,
                    report.finished_at,
                    report.terms.len()
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

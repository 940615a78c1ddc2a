//! comment-sync CLI
//!
//! Local execution entry point. For AWS Lambda, use `comment-sync-lambda`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comment_sync::{
    engine::{SyncEngine, SyncRequest},
    error::Result,
    models::{Config, PostChanges, PostPatch},
    pipeline::CrawlMode,
    storage::{KvStore, LocalStorage, MemoryStorage, TITLES_KEY},
};
use serde::Serialize;

/// comment-sync - incremental comment synchronization
#[derive(Parser, Debug)]
#[command(
    name = "comment-sync",
    version,
    about = "Incrementally syncs episode comments and tracks unread counts"
)]
struct Cli {
    /// Path to storage directory containing config and state
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Keep state in memory only; nothing is written to the storage directory
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config.toml into the storage directory
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run one sync cycle
    Sync {
        /// Ignore cursors and error records and re-read everything
        #[arg(long)]
        full: bool,
    },

    /// Request a sync cycle on a fixed interval
    Watch {
        /// Seconds between sync requests
        #[arg(long, default_value_t = 600)]
        interval: u64,
    },

    /// Print stored posts of a title
    Posts {
        title_id: u64,
        #[arg(long)]
        episode: Option<u32>,
    },

    /// Print unread counts for every tracked title
    Counts,

    /// Mark posts of a title read (or unread)
    MarkRead {
        title_id: u64,
        #[arg(long)]
        episode: Option<u32>,
        #[arg(long)]
        unread: bool,
    },

    /// Refresh and print the tracked title list
    Titles,

    /// Validate configuration
    Validate,

    /// Show storage state
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");

    if let Command::Init { force } = cli.command {
        if config_path.exists() && !force {
            log::warn!(
                "Config already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
            return Ok(());
        }
        std::fs::create_dir_all(&cli.storage_dir)?;
        std::fs::write(&config_path, toml::to_string_pretty(&Config::default())?)?;
        log::info!("Default config written to {}", config_path.display());
        return Ok(());
    }

    let mut config = Config::load_or_default(&config_path);
    config.apply_env_overrides();
    log::debug!("Loaded configuration from {}", config_path.display());

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!("✓ Config OK ({} titles)", config.titles.len());
        return Ok(());
    }
    config.validate()?;

    let kv: Arc<dyn KvStore> = if cli.dry_run {
        log::info!("Dry run: state is kept in memory");
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(LocalStorage::new(&cli.storage_dir))
    };
    let engine = Arc::new(SyncEngine::new(config, kv)?);

    match cli.command {
        Command::Init { .. } | Command::Validate => {}

        Command::Sync { full } => {
            let mode = if full {
                CrawlMode::Full
            } else {
                CrawlMode::Incremental
            };
            match engine.run_cycle(mode).await? {
                Some(report) => print_json(&report)?,
                None => log::warn!("Another sync cycle is running"),
            }
        }

        Command::Watch { interval } => {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                match engine.request_sync() {
                    SyncRequest::Started(handle) => {
                        tokio::spawn(async move {
                            match handle.await {
                                Ok(Ok(report)) => log::info!(
                                    "Cycle done: {} new posts in {} ms",
                                    report.new_posts(),
                                    report.elapsed_ms
                                ),
                                Ok(Err(e)) if e.is_auth() => {
                                    log::error!("Cycle aborted, session rejected: {e}")
                                }
                                Ok(Err(e)) => log::error!("Cycle failed: {e}"),
                                Err(e) => log::error!("Cycle task panicked: {e}"),
                            }
                        });
                    }
                    SyncRequest::AlreadyRunning => {
                        log::info!("Previous cycle still running; skipping tick")
                    }
                }
            }
        }

        Command::Posts { title_id, episode } => {
            let posts = engine.request_posts(title_id, episode).await?;
            print_json(&posts)?;
        }

        Command::Counts => {
            print_json(&engine.request_counts().await?)?;
        }

        Command::MarkRead {
            title_id,
            episode,
            unread,
        } => {
            let changes = if unread {
                PostChanges::mark_unread()
            } else {
                PostChanges::mark_read()
            };
            let summary = engine
                .patch_posts(&PostPatch {
                    changes,
                    title_id,
                    episode,
                })
                .await?;
            print_json(&summary)?;
        }

        Command::Titles => {
            print_json(&engine.request_titles().await?)?;
        }

        Command::Info => {
            let store = engine.store();
            log::info!("Storage directory: {}", cli.storage_dir.display());
            let titles = store.load_titles().await?;
            if titles.is_empty() {
                log::info!(
                    "No tracked titles at {} yet.",
                    store.location(TITLES_KEY)
                );
            }
            for title in titles {
                let record = store.load_title(title.id).await?;
                log::info!(
                    "{} ({}): {} posts, {} episodes, {} open errors, updated {}",
                    title.name,
                    title.id,
                    record.total_posts(),
                    record
                        .episode_count
                        .map_or_else(|| "?".to_string(), |c| c.to_string()),
                    record.errors.len(),
                    record
                        .updated_at
                        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
                );
            }
        }
    }

    Ok(())
}

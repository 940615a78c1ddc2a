// src/lambda/mod.rs

//! AWS Lambda handler for the sync engine.
//!
//! Each invocation:
//! 1. Loads `config.toml` from S3 (defaults if absent) plus env overrides
//! 2. Runs one sync cycle against S3-backed title state
//! 3. Reports new posts and whether the run budget halted the cycle

use std::sync::Arc;

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::engine::SyncEngine;
use crate::error::{AppError, Result};
use crate::models::Config;
use crate::pipeline::{CrawlMode, CycleReport};
use crate::storage::{KvStore, S3Storage};

/// Storage key of the configuration object.
pub const CONFIG_KEY: &str = "config.toml";

/// Lambda invocation payload.
#[derive(Debug, Default, Deserialize)]
pub struct SyncEvent {
    /// Ignore cursors and error records and re-read everything
    #[serde(default)]
    pub full: bool,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct SyncResponse {
    /// Whether the cycle completed
    pub success: bool,

    /// Number of titles merged
    pub titles: usize,

    /// Number of posts seen for the first time
    pub new_posts: usize,

    /// Whether the run budget stopped the cycle early
    pub halted: bool,

    /// Error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl From<&CycleReport> for SyncResponse {
    fn from(report: &CycleReport) -> Self {
        Self {
            success: true,
            titles: report.titles.len(),
            new_posts: report.new_posts(),
            halted: report.halted,
            error: None,
            execution_time_ms: 0,
        }
    }
}

/// Main Lambda handler function.
#[instrument(skip(event))]
pub async fn handler(
    event: LambdaEvent<SyncEvent>,
) -> std::result::Result<SyncResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (request, _context) = event.into_parts();
    info!("Starting sync: full={}", request.full);

    match run_sync(&request).await {
        Ok(mut response) => {
            response.execution_time_ms = start.elapsed().as_millis() as u64;
            info!(
                "Sync completed: {} titles, {} new posts in {}ms",
                response.titles, response.new_posts, response.execution_time_ms
            );
            Ok(response)
        }
        Err(e) => {
            error!("Sync failed: {}", e);
            Ok(SyncResponse {
                success: false,
                error: Some(e.to_string()),
                execution_time_ms: start.elapsed().as_millis() as u64,
                ..Default::default()
            })
        }
    }
}

async fn run_sync(request: &SyncEvent) -> Result<SyncResponse> {
    let storage: Arc<dyn KvStore> = Arc::new(S3Storage::from_env().await?);
    sync_with_storage(request, storage).await
}

/// Run one cycle against `storage`.
///
/// Each invocation builds its own engine, so its run guard is always free
/// and the cycle always starts.
pub async fn sync_with_storage(
    request: &SyncEvent,
    storage: Arc<dyn KvStore>,
) -> Result<SyncResponse> {
    let config = load_lambda_config(storage.as_ref()).await?;
    config.validate()?;

    let engine = SyncEngine::new(config, storage)?;
    let mode = if request.full {
        CrawlMode::Full
    } else {
        CrawlMode::Incremental
    };

    let report = engine.run_cycle(mode).await?.unwrap_or_default();
    Ok(SyncResponse::from(&report))
}

/// Load configuration from storage, falling back to defaults, then apply
/// environment overrides.
pub async fn load_lambda_config(storage: &dyn KvStore) -> Result<Config> {
    let mut config = match storage.get(CONFIG_KEY).await? {
        Some(bytes) => {
            let text = String::from_utf8(bytes)
                .map_err(|e| AppError::config(format!("{CONFIG_KEY} is not UTF-8: {e}")))?;
            toml::from_str(&text)?
        }
        None => {
            warn!(
                "No config at {}; using defaults",
                storage.location(CONFIG_KEY)
            );
            Config::default()
        }
    };
    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let storage = MemoryStorage::new();
        let config = load_lambda_config(&storage).await.unwrap();
        assert_eq!(config.crawler.page_attempts, 2);
    }

    #[tokio::test]
    async fn stored_config_is_parsed() {
        let storage = MemoryStorage::new();
        storage
            .set(CONFIG_KEY, b"[budget]\ntitle_secs = 60\nrun_secs = 600\n")
            .await
            .unwrap();

        let config = load_lambda_config(&storage).await.unwrap();
        assert_eq!(config.budget.title_secs, 60);
        assert_eq!(config.budget.run_secs, 600);
    }

    #[tokio::test]
    async fn invocation_runs_a_cycle_on_given_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let response = sync_with_storage(&SyncEvent::default(), storage.clone())
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.titles, 0);
        assert!(!response.halted);
        assert!(storage.get(crate::storage::TITLES_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_stored_config_fails_invocation() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(CONFIG_KEY, b"[crawler]\nmax_concurrent = 0\n")
            .await
            .unwrap();

        let result = sync_with_storage(&SyncEvent::default(), storage).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn response_reflects_report() {
        let report = CycleReport {
            halted: true,
            ..CycleReport::default()
        };
        let response = SyncResponse::from(&report);
        assert!(response.success);
        assert!(response.halted);
        assert_eq!(response.new_posts, 0);
    }
}

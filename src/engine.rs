// src/engine.rs

//! Inbound interface of the sync engine.
//!
//! Every entry point reloads from storage; the engine keeps no state of its
//! own beyond the run guard.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::{Config, Post, PostCountSummary, PostPatch, Title};
use crate::pipeline::counts::summarize;
use crate::pipeline::orchestrate::{CycleGuard, CycleReport, TitleOrchestrator};
use crate::pipeline::patch;
use crate::pipeline::schedule::{CrawlMode, CrawlScheduler};
use crate::services::{
    ConcurrencyLimiter, ConfigTitleSource, EpisodeCrawler, EpisodeSource, HtmlEpisodeSource,
    HttpPageFetcher, PageFetcher, TitleSource,
};
use crate::storage::{KvStore, Store};

/// Answer to a sync request.
#[derive(Debug)]
pub enum SyncRequest {
    /// A cycle was started in the background.
    Started(JoinHandle<Result<CycleReport>>),
    /// A cycle is already in progress; nothing was queued.
    AlreadyRunning,
}

/// Remote collaborators of the engine.
pub struct Sources {
    pub pages: Arc<dyn PageFetcher>,
    pub episodes: Arc<dyn EpisodeSource>,
    pub titles: Arc<dyn TitleSource>,
}

impl Sources {
    /// HTTP fetcher, HTML episode list and configured titles.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            pages: Arc::new(HttpPageFetcher::new(config)?),
            episodes: Arc::new(HtmlEpisodeSource::new(config)?),
            titles: Arc::new(ConfigTitleSource::from_config(config)),
        })
    }
}

pub struct SyncEngine {
    store: Store,
    orchestrator: TitleOrchestrator,
    titles: Arc<dyn TitleSource>,
}

impl SyncEngine {
    /// Build an engine talking to the configured remote.
    pub fn new(config: Config, kv: Arc<dyn KvStore>) -> Result<Self> {
        let sources = Sources::from_config(&config)?;
        Ok(Self::with_sources(config, kv, sources))
    }

    pub fn with_sources(config: Config, kv: Arc<dyn KvStore>, sources: Sources) -> Self {
        let config = Arc::new(config);
        let store = Store::new(kv);
        let limiter = ConcurrencyLimiter::new(config.crawler.max_concurrent);
        let crawler = EpisodeCrawler::new(sources.pages, limiter, &config.crawler);
        let scheduler = CrawlScheduler::new(crawler, sources.episodes);
        Self {
            orchestrator: TitleOrchestrator::new(store.clone(), scheduler, config),
            store,
            titles: sources.titles,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_syncing(&self) -> bool {
        self.orchestrator.guard().is_running()
    }

    /// Start an incremental cycle in the background unless one is running.
    pub fn request_sync(self: &Arc<Self>) -> SyncRequest {
        let Some(cycle) = self.orchestrator.guard().try_begin_cycle() else {
            log::info!("Sync already in progress; request ignored");
            return SyncRequest::AlreadyRunning;
        };
        let engine = Arc::clone(self);
        SyncRequest::Started(tokio::spawn(async move {
            engine.run_guarded(&cycle, CrawlMode::Incremental).await
        }))
    }

    /// Run one cycle in-line. `Ok(None)` if another cycle is running.
    pub async fn run_cycle(&self, mode: CrawlMode) -> Result<Option<CycleReport>> {
        let Some(cycle) = self.orchestrator.guard().try_begin_cycle() else {
            log::info!("Sync already in progress; request ignored");
            return Ok(None);
        };
        self.run_guarded(&cycle, mode).await.map(Some)
    }

    async fn run_guarded(&self, cycle: &CycleGuard, mode: CrawlMode) -> Result<CycleReport> {
        let titles = self.tracked_titles().await?;
        self.orchestrator.run_cycle(cycle, &titles, mode).await
    }

    /// Stored titles, discovering them on first use.
    async fn tracked_titles(&self) -> Result<Vec<Title>> {
        let titles = self.store.load_titles().await?;
        if titles.is_empty() {
            return self.request_titles().await;
        }
        Ok(titles)
    }

    /// Run title discovery and store the result.
    pub async fn request_titles(&self) -> Result<Vec<Title>> {
        let titles = self.titles.discover().await?;
        self.store.save_titles(&titles).await?;
        Ok(titles)
    }

    /// Stored root posts of a title, optionally one episode.
    pub async fn request_posts(&self, title_id: u64, episode: Option<u32>) -> Result<Vec<Post>> {
        self.ensure_tracked(title_id).await?;
        let record = self.store.load_title(title_id).await?;
        Ok(record.posts_in(episode))
    }

    /// Count summaries for every tracked title.
    pub async fn request_counts(&self) -> Result<Vec<PostCountSummary>> {
        let mut summaries = Vec::new();
        for title in self.store.load_titles().await? {
            let record = self.store.load_title(title.id).await?;
            summaries.push(summarize(&record));
        }
        Ok(summaries)
    }

    pub async fn patch_post(&self, post: &Post) -> Result<PostCountSummary> {
        self.ensure_tracked(post.title_id).await?;
        patch::patch_post(&self.store, post).await
    }

    pub async fn patch_posts(&self, patch: &PostPatch) -> Result<PostCountSummary> {
        self.ensure_tracked(patch.title_id).await?;
        patch::patch_posts(&self.store, patch).await
    }

    async fn ensure_tracked(&self, title_id: u64) -> Result<()> {
        let titles = self.store.load_titles().await?;
        if titles.iter().any(|t| t.id == title_id) {
            Ok(())
        } else {
            Err(AppError::UnknownTitle(title_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlErrorRecord, CrawlerConfig, PostChanges, PostId, TitleRecord};
    use crate::storage::MemoryStorage;
    use crate::test_utils::{FixedEpisodes, ScriptedFetcher, page, root, webtoon};

    fn engine(fetcher: Arc<ScriptedFetcher>) -> Arc<SyncEngine> {
        let config = Config {
            crawler: CrawlerConfig {
                page_attempts: 1,
                request_delay_ms: 0,
                ..CrawlerConfig::default()
            },
            ..Config::default()
        };
        let sources = Sources {
            pages: fetcher,
            episodes: Arc::new(FixedEpisodes::new().with(1, 1)),
            titles: Arc::new(ConfigTitleSource::new(vec![webtoon(1)])),
        };
        Arc::new(SyncEngine::with_sources(
            config,
            Arc::new(MemoryStorage::new()),
            sources,
        ))
    }

    #[tokio::test]
    async fn first_sync_discovers_titles() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page("w_1_1", None, page(vec![root(1, 1, "1", 1)], None));
        let engine = engine(fetcher);

        let report = engine
            .run_cycle(CrawlMode::Incremental)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.new_posts(), 1);
        assert_eq!(engine.store().load_titles().await.unwrap(), vec![webtoon(1)]);
    }

    #[tokio::test]
    async fn request_sync_refuses_overlap() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page_delayed(
            "w_1_1",
            None,
            std::time::Duration::from_millis(100),
            page(vec![root(1, 1, "1", 1)], None),
        );
        let engine = engine(fetcher);

        let SyncRequest::Started(handle) = engine.request_sync() else {
            panic!("first request should start a cycle");
        };
        assert!(engine.is_syncing());
        assert!(matches!(engine.request_sync(), SyncRequest::AlreadyRunning));
        assert!(engine.run_cycle(CrawlMode::Full).await.unwrap().is_none());

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.new_posts(), 1);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn counts_and_patches_follow_storage() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page(
            "w_1_1",
            None,
            page(vec![root(1, 1, "2", 2), root(1, 1, "1", 1)], None),
        );
        let engine = engine(fetcher);
        engine.run_cycle(CrawlMode::Incremental).await.unwrap();

        let counts = engine.request_counts().await.unwrap();
        assert_eq!(counts[0].total_new_count, 2);

        let summary = engine
            .patch_posts(&PostPatch {
                changes: PostChanges::mark_read(),
                title_id: 1,
                episode: None,
            })
            .await
            .unwrap();
        assert_eq!(summary.total_new_count, 0);

        let posts = engine.request_posts(1, Some(1)).await.unwrap();
        assert!(posts.iter().all(|p| !p.is_new));
    }

    #[tokio::test]
    async fn stored_open_error_is_resolved_on_next_sync() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page("w_1_1", Some("p2"), page(vec![root(1, 1, "1", 1)], None));
        let engine = engine(fetcher.clone());

        let store = engine.store();
        store.save_titles(&[webtoon(1)]).await.unwrap();
        let mut record = TitleRecord::new(1);
        record.posts.push(root(1, 1, "5", 5));
        record.errors.insert(
            1,
            CrawlErrorRecord::new(
                "request aborted after 1800 ms",
                Some("p2".into()),
                Some(PostId::from("GW:0-w_1_1-5")),
            ),
        );
        store.save_title(&record).await.unwrap();
        assert!(!engine.request_counts().await.unwrap()[0].is_completed);

        let report = engine
            .run_cycle(CrawlMode::Incremental)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.titles[0].resolved_episodes, vec![1]);
        assert_eq!(fetcher.calls(), vec!["w_1_1@p2".to_string()]);
        let stored = engine.store().load_title(1).await.unwrap();
        assert!(stored.errors.is_empty());
        assert_eq!(stored.cursors[&1], PostId::from("GW:0-w_1_1-5"));
        assert_eq!(stored.posts.len(), 2);

        let counts = engine.request_counts().await.unwrap();
        assert!(counts[0].is_completed);
        assert_eq!(counts[0].total_count, 2);
    }

    #[tokio::test]
    async fn unknown_title_is_rejected() {
        let engine = engine(Arc::new(ScriptedFetcher::new()));
        engine.request_titles().await.unwrap();

        assert!(matches!(
            engine.request_posts(99, None).await,
            Err(AppError::UnknownTitle(99))
        ));
    }
}

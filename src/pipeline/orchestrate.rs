// src/pipeline/orchestrate.rs

//! Title orchestrator.
//!
//! One sync cycle crawls every tracked title in turn, fetches replies for
//! threads that grew, and only then merges the results into storage. Each
//! title entry is reloaded right before its merge so that patches written
//! while the cycle was crawling are kept.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::{FetchError, Result};
use crate::models::{Config, Post, PostId, Title, TitleRecord};
use crate::pipeline::merge::{merge_posts, merge_replies};
use crate::pipeline::schedule::{Budget, CrawlMode, CrawlScheduler, Halt, TitleCrawl};
use crate::services::EpisodeRef;
use crate::storage::Store;

/// Process-wide "a cycle is running" flag.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` while another cycle holds it.
    pub fn try_begin_cycle(&self) -> Option<CycleGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof that the caller owns the running cycle. Dropping it ends the cycle.
#[derive(Debug)]
#[must_use = "the cycle ends when the guard is dropped"]
pub struct CycleGuard {
    running: Arc<AtomicBool>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Outcome of one title within a cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleReport {
    pub title_id: u64,
    pub name: String,
    pub new_posts: usize,
    pub updated_posts: usize,
    pub failed_episodes: Vec<u32>,
    pub resolved_episodes: Vec<u32>,
    pub episode_count: Option<u32>,
    /// Open errors could not be resolved; nothing was written
    pub aborted: bool,
    pub halted: bool,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub titles: Vec<TitleReport>,
    /// The run budget ran out before every title was crawled
    pub halted: bool,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn new_posts(&self) -> usize {
        self.titles.iter().map(|t| t.new_posts).sum()
    }

    pub fn failed_episodes(&self) -> usize {
        self.titles.iter().map(|t| t.failed_episodes.len()).sum()
    }
}

struct Pending {
    title: Title,
    crawl: TitleCrawl,
    /// Roots whose replies are fetched this cycle, with their episode
    reply_targets: Vec<(u32, PostId)>,
    /// Replies that arrived, by root
    fetched: HashMap<PostId, Vec<Post>>,
}

/// Drives the scheduler across all tracked titles and persists the result.
pub struct TitleOrchestrator {
    store: Store,
    scheduler: CrawlScheduler,
    config: Arc<Config>,
    guard: RunGuard,
}

impl TitleOrchestrator {
    pub fn new(store: Store, scheduler: CrawlScheduler, config: Arc<Config>) -> Self {
        Self {
            store,
            scheduler,
            config,
            guard: RunGuard::new(),
        }
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    /// Run one cycle over `titles`.
    ///
    /// An authentication failure aborts the cycle before anything is merged.
    pub async fn run_cycle(
        &self,
        _cycle: &CycleGuard,
        titles: &[Title],
        mode: CrawlMode,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let budget = Budget::from_config(&self.config.budget);
        log::info!("Sync cycle starting: {} titles ({mode:?})", titles.len());

        let (mut pending, halted) = self.crawl_titles(titles, mode, &budget).await?;
        self.fetch_replies(&mut pending, &budget).await?;

        let mut report = CycleReport {
            halted,
            ..CycleReport::default()
        };
        for item in pending {
            let title_id = item.title.id;
            match self.merge_title(item).await {
                Ok(title_report) => report.titles.push(title_report),
                Err(e) => log::error!("Failed to merge title {title_id}: {e}"),
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Sync cycle finished in {} ms: {} new posts, {} failed episodes{}",
            report.elapsed_ms,
            report.new_posts(),
            report.failed_episodes(),
            if report.halted { " (halted by run budget)" } else { "" }
        );
        Ok(report)
    }

    /// Crawl titles one after another until done or out of run budget.
    async fn crawl_titles(
        &self,
        titles: &[Title],
        mode: CrawlMode,
        budget: &Budget,
    ) -> Result<(Vec<Pending>, bool)> {
        let mut pending = Vec::new();

        for title in titles {
            if budget.run_exhausted() {
                log::warn!("Run budget exhausted before {}", title.name);
                return Ok((pending, true));
            }

            let record = match self.store.load_title(title.id).await {
                Ok(record) => record,
                Err(e) => {
                    log::error!("Skipping {}: {e}", title.name);
                    continue;
                }
            };

            let crawl = self
                .scheduler
                .crawl_title(title, &record, mode, budget)
                .await
                .inspect_err(|e| log::error!("Aborting sync cycle at {}: {e}", title.name))?;

            log::info!(
                "{}: {} fresh posts, {} failed, {} resolved",
                title.name,
                crawl.posts.len(),
                crawl.errors.len(),
                crawl.cleared.len()
            );

            let run_halted = crawl.halted == Some(Halt::Run);
            pending.push(Pending {
                title: title.clone(),
                reply_targets: reply_targets(&record, &crawl),
                crawl,
                fetched: HashMap::new(),
            });
            if run_halted {
                return Ok((pending, true));
            }
        }
        Ok((pending, false))
    }

    /// Fetch replies for every reply target. Targets that fail or are
    /// skipped stay owed and are retried next cycle.
    async fn fetch_replies(&self, pending: &mut [Pending], budget: &Budget) -> Result<()> {
        let jobs: Vec<(usize, EpisodeRef, PostId)> = pending
            .iter()
            .enumerate()
            .flat_map(|(i, item)| {
                item.reply_targets.iter().map(move |(episode, root_id)| {
                    (i, EpisodeRef::new(&item.title, *episode), root_id.clone())
                })
            })
            .collect();

        if jobs.is_empty() {
            return Ok(());
        }
        if budget.run_exhausted() {
            log::warn!("Run budget exhausted; deferring {} reply fetches", jobs.len());
            return Ok(());
        }
        log::info!("Fetching replies for {} threads", jobs.len());

        let crawler = self.scheduler.crawler();
        let concurrency = crawler.limiter().capacity();
        let fetches = stream::iter(jobs)
            .map(|(i, episode, root_id)| async move {
                let result = crawler.crawl_replies(&episode, &root_id).await;
                (i, root_id, result)
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>();

        let Ok(results) = tokio::time::timeout_at(budget.run_deadline(), fetches).await else {
            log::warn!("Run budget exhausted while fetching replies; deferring them");
            return Ok(());
        };

        for (i, root_id, result) in results {
            match result {
                Ok(replies) => {
                    pending[i].fetched.insert(root_id, replies);
                }
                Err(error @ FetchError::Auth(_)) => {
                    log::error!("Aborting sync cycle: replies of {root_id}: {error}");
                    return Err(error.into());
                }
                Err(error) => {
                    log::warn!("Replies of {root_id} failed, retrying next cycle: {error}")
                }
            }
        }
        Ok(())
    }

    /// Reload, merge and write back one title.
    async fn merge_title(&self, item: Pending) -> Result<TitleReport> {
        let Pending {
            title,
            crawl,
            reply_targets,
            mut fetched,
        } = item;
        let mut report = TitleReport {
            title_id: title.id,
            name: title.name.clone(),
            failed_episodes: crawl.failed_episodes(),
            resolved_episodes: crawl.resolved_episodes(),
            aborted: crawl.aborted,
            halted: crawl.halted.is_some(),
            ..TitleReport::default()
        };

        let mut record = self.store.load_title(title.id).await?;
        if crawl.aborted {
            report.episode_count = record.episode_count;
            return Ok(report);
        }

        crawl.apply_state(&mut record);
        let (posts, mut stats) = merge_posts(
            std::mem::take(&mut record.posts),
            crawl.posts,
            self.config.storage.retention_cap,
        );
        record.posts = posts;

        record.pending_replies.extend(
            reply_targets
                .into_iter()
                .map(|(_, id)| id)
                .filter(|id| !fetched.contains_key(id)),
        );
        for root in &mut record.posts {
            if let Some(replies) = fetched.remove(&root.id) {
                stats.absorb(merge_replies(root, replies));
                record.pending_replies.remove(&root.id);
            }
        }
        let roots: HashSet<&PostId> = record.posts.iter().map(|p| &p.id).collect();
        record.pending_replies.retain(|id| roots.contains(id));

        self.store.save_title(&record).await?;

        if stats.evicted > 0 {
            log::info!("{}: evicted {} old posts", title.name, stats.evicted);
        }
        if !record.pending_replies.is_empty() {
            log::warn!(
                "{}: replies still owed for {} threads",
                title.name,
                record.pending_replies.len()
            );
        }
        report.new_posts = stats.inserted;
        report.updated_posts = stats.updated;
        report.episode_count = record.episode_count;
        Ok(report)
    }
}

/// Fresh roots whose reply count exceeds the replies held, plus stored roots
/// still owed replies from an earlier cycle.
fn reply_targets(record: &TitleRecord, crawl: &TitleCrawl) -> Vec<(u32, PostId)> {
    if crawl.aborted {
        return Vec::new();
    }
    let held: HashMap<&PostId, &Post> = record.posts.iter().map(|p| (&p.id, p)).collect();
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for post in &crawl.posts {
        let held_replies = held.get(&post.id).map_or(0, |p| p.replies.len());
        let owed = post.reply_count as usize > held_replies
            || record.pending_replies.contains(&post.id);
        if owed && seen.insert(&post.id) {
            targets.push((post.episode, post.id.clone()));
        }
    }
    for id in &record.pending_replies {
        if let Some(root) = held.get(id) {
            if seen.insert(id) {
                targets.push((root.episode, id.clone()));
            }
        }
    }
    targets
}

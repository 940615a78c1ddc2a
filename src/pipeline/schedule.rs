// src/pipeline/schedule.rs

//! Crawl scheduler.
//!
//! Crawls the episodes of one title in order under two time budgets: a
//! ceiling for the title and a deadline for the whole cycle. Open errors are
//! resolved before anything else is crawled.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppError, FetchError, Result};
use crate::models::{BudgetConfig, CrawlErrorRecord, Post, Title, TitleRecord};
use crate::pipeline::cursor::CursorLedger;
use crate::services::{CrawlStart, EpisodeCrawl, EpisodeCrawler, EpisodeRef, EpisodeSource};

/// How much of a title to re-read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CrawlMode {
    /// Resolve open errors, then read each episode down to its cursor.
    #[default]
    Incremental,
    /// Ignore cursors and error records and read everything.
    Full,
}

/// Time budgets for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    title: Duration,
    run_deadline: Instant,
}

impl Budget {
    pub fn new(title: Duration, run: Duration) -> Self {
        Self {
            title,
            run_deadline: Instant::now() + run,
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(
            Duration::from_secs(config.title_secs),
            Duration::from_secs(config.run_secs),
        )
    }

    pub fn run_deadline(&self) -> Instant {
        self.run_deadline
    }

    pub fn run_exhausted(&self) -> bool {
        Instant::now() >= self.run_deadline
    }

    fn title_deadline(&self, started: Instant) -> Instant {
        (started + self.title).min(self.run_deadline)
    }
}

/// Which budget stopped a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    Title,
    Run,
}

/// Everything one title crawl produced, to be merged at the end of the cycle.
#[derive(Debug, Clone, Default)]
pub struct TitleCrawl {
    pub title_id: u64,
    /// Fresh root posts, all episodes
    pub posts: Vec<Post>,
    /// Cursor advances observed this crawl
    pub cursors: CursorLedger,
    /// Error records opened or replaced
    pub errors: BTreeMap<u32, CrawlErrorRecord>,
    /// Episodes whose open error is resolved
    pub cleared: BTreeSet<u32>,
    pub episode_count: Option<u32>,
    pub halted: Option<Halt>,
    /// Error resolution failed; nothing from this crawl is applied
    pub aborted: bool,
}

impl TitleCrawl {
    fn new(title_id: u64) -> Self {
        Self {
            title_id,
            ..Self::default()
        }
    }

    pub fn failed_episodes(&self) -> Vec<u32> {
        self.errors.keys().copied().collect()
    }

    pub fn resolved_episodes(&self) -> Vec<u32> {
        self.cleared.iter().copied().collect()
    }

    /// Fold this crawl's bookkeeping into the stored record.
    pub fn apply_state(&self, record: &mut TitleRecord) {
        if self.aborted {
            return;
        }
        let mut ledger = CursorLedger::from(std::mem::take(&mut record.cursors));
        ledger.absorb(&self.cursors);
        record.cursors = ledger.into_inner();

        for episode in &self.cleared {
            record.errors.remove(episode);
        }
        record
            .errors
            .extend(self.errors.iter().map(|(e, r)| (*e, r.clone())));

        if self.episode_count.is_some() {
            record.episode_count = self.episode_count;
        }
    }
}

enum Step {
    Crawled(EpisodeCrawl),
    OutOfTime(Halt),
}

/// Drives the episode crawler across one title.
#[derive(Clone)]
pub struct CrawlScheduler {
    crawler: EpisodeCrawler,
    episodes: Arc<dyn EpisodeSource>,
}

impl CrawlScheduler {
    pub fn new(crawler: EpisodeCrawler, episodes: Arc<dyn EpisodeSource>) -> Self {
        Self { crawler, episodes }
    }

    pub fn crawler(&self) -> &EpisodeCrawler {
        &self.crawler
    }

    /// Crawl one title against its stored record.
    ///
    /// Returns `Err` only for authentication failures, which abort the cycle.
    pub async fn crawl_title(
        &self,
        title: &Title,
        record: &TitleRecord,
        mode: CrawlMode,
        budget: &Budget,
    ) -> Result<TitleCrawl> {
        let deadline = budget.title_deadline(Instant::now());
        let mut crawl = TitleCrawl::new(title.id);
        let mut ledger = match mode {
            CrawlMode::Incremental => CursorLedger::from(record.cursors.clone()),
            CrawlMode::Full => CursorLedger::new(),
        };

        if mode == CrawlMode::Incremental && record.has_open_errors() {
            self.resolve_errors(title, record, &mut ledger, &mut crawl, deadline, budget)
                .await?;
            if crawl.aborted || crawl.halted.is_some() {
                crawl.cursors = ledger;
                return Ok(crawl);
            }
        }

        let count = self.episode_count(title, record).await?;
        let probing = count.is_none();
        if probing {
            log::info!("{}: episode count unknown, probing", title.name);
        }

        let mut episode = 0u32;
        loop {
            episode += 1;
            if count.is_some_and(|c| episode > c) {
                break;
            }
            if crawl.cleared.contains(&episode) {
                continue;
            }

            let known = match mode {
                CrawlMode::Incremental => ledger.get(episode).cloned(),
                CrawlMode::Full => None,
            };
            let start = CrawlStart {
                known: known.as_ref(),
                resume: None,
                discovery: probing,
            };
            let target = EpisodeRef::new(title, episode);

            match self.timed(&target, start, deadline, budget).await {
                Step::OutOfTime(halt) => {
                    log::warn!(
                        "{}: budget exhausted during episode {episode}",
                        title.name
                    );
                    crawl
                        .errors
                        .insert(episode, CrawlErrorRecord::budget_exceeded());
                    crawl.halted = Some(halt);
                    break;
                }
                Step::Crawled(EpisodeCrawl::Done) => {
                    crawl.episode_count = Some(episode - 1);
                    break;
                }
                Step::Crawled(EpisodeCrawl::Success { posts, newest }) => {
                    crawl.posts.extend(posts);
                    if let Some(newest) = newest {
                        ledger.set(episode, newest);
                    }
                    if record.errors.contains_key(&episode) {
                        crawl.cleared.insert(episode);
                    }
                }
                Step::Crawled(EpisodeCrawl::Fail {
                    posts,
                    newest,
                    cursor,
                    error,
                }) => {
                    if let FetchError::Auth(_) = error {
                        return Err(AppError::from(error));
                    }
                    log::warn!("{}: episode {episode} failed: {error}", title.name);
                    crawl.posts.extend(posts);
                    crawl.errors.insert(
                        episode,
                        CrawlErrorRecord::new(error.to_string(), cursor, newest),
                    );
                    if probing {
                        log::warn!(
                            "{}: probing stopped at episode {episode}; count stays unknown",
                            title.name
                        );
                        break;
                    }
                }
            }

            if budget.run_exhausted() {
                log::warn!("Run budget exhausted after {} episode {episode}", title.name);
                crawl.halted = Some(Halt::Run);
                break;
            }
        }

        if crawl.episode_count.is_none() {
            crawl.episode_count = count;
        }
        crawl.cursors = ledger;
        Ok(crawl)
    }

    /// Re-crawl exactly the episodes with open errors, from their recorded
    /// cursors. Any failure aborts the title and leaves the error state as
    /// stored.
    async fn resolve_errors(
        &self,
        title: &Title,
        record: &TitleRecord,
        ledger: &mut CursorLedger,
        crawl: &mut TitleCrawl,
        deadline: Instant,
        budget: &Budget,
    ) -> Result<()> {
        let mut resolved = Vec::new();
        let mut resolved_cursors = ledger.clone();

        for (&episode, error) in &record.errors {
            let known = ledger.get(episode).cloned();
            let start = CrawlStart {
                known: known.as_ref(),
                resume: Some(error),
                discovery: false,
            };
            let target = EpisodeRef::new(title, episode);

            match self.timed(&target, start, deadline, budget).await {
                Step::Crawled(EpisodeCrawl::Success { posts, newest }) => {
                    resolved.extend(posts);
                    if let Some(newest) = newest {
                        resolved_cursors.set(episode, newest);
                    }
                    crawl.cleared.insert(episode);
                }
                Step::Crawled(EpisodeCrawl::Done) => {
                    crawl.cleared.insert(episode);
                }
                Step::Crawled(EpisodeCrawl::Fail { error, .. }) => {
                    if let FetchError::Auth(_) = error {
                        return Err(AppError::from(error));
                    }
                    log::warn!(
                        "{}: episode {episode} still failing ({error}); skipping title this cycle",
                        title.name
                    );
                    Self::abort(crawl);
                    return Ok(());
                }
                Step::OutOfTime(halt) => {
                    log::warn!(
                        "{}: budget exhausted resolving episode {episode}; skipping title this cycle",
                        title.name
                    );
                    Self::abort(crawl);
                    if halt == Halt::Run {
                        crawl.halted = Some(Halt::Run);
                    }
                    return Ok(());
                }
            }
        }

        log::info!(
            "{}: resolved {} failed episodes",
            title.name,
            crawl.cleared.len()
        );
        crawl.posts.extend(resolved);
        *ledger = resolved_cursors;
        if budget.run_exhausted() {
            crawl.halted = Some(Halt::Run);
        }
        Ok(())
    }

    fn abort(crawl: &mut TitleCrawl) {
        crawl.aborted = true;
        crawl.cleared.clear();
        crawl.posts.clear();
    }

    /// Run one episode crawl under whichever budget ends first.
    async fn timed(
        &self,
        target: &EpisodeRef,
        start: CrawlStart<'_>,
        deadline: Instant,
        budget: &Budget,
    ) -> Step {
        match tokio::time::timeout_at(deadline, self.crawler.crawl(target, start)).await {
            Ok(result) => Step::Crawled(result),
            Err(_) if budget.run_exhausted() => Step::OutOfTime(Halt::Run),
            Err(_) => Step::OutOfTime(Halt::Title),
        }
    }

    /// Latest episode from the episode source, falling back to the stored
    /// count. `None` means the count must be probed.
    async fn episode_count(&self, title: &Title, record: &TitleRecord) -> Result<Option<u32>> {
        match self.episodes.latest_episode(title).await {
            Ok(Some(count)) => Ok(Some(count)),
            Ok(None) => Ok(record.episode_count),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                log::warn!(
                    "{}: episode list unavailable ({e}); using stored count {:?}",
                    title.name,
                    record.episode_count
                );
                Ok(record.episode_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlerConfig, PostId};
    use crate::services::ConcurrencyLimiter;
    use crate::test_utils::{FixedEpisodes, ScriptedFetcher, page, root, webtoon};

    const LONG: Duration = Duration::from_secs(60);

    fn scheduler(fetcher: Arc<ScriptedFetcher>, episodes: FixedEpisodes) -> CrawlScheduler {
        let config = CrawlerConfig {
            page_attempts: 1,
            request_delay_ms: 0,
            ..CrawlerConfig::default()
        };
        let crawler = EpisodeCrawler::new(fetcher, ConcurrencyLimiter::new(2), &config);
        CrawlScheduler::new(crawler, Arc::new(episodes))
    }

    #[tokio::test]
    async fn known_count_crawls_every_episode() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher
            .on_page("w_1_1", None, page(vec![root(1, 1, "1", 1)], None))
            .on_page("w_1_2", None, page(vec![root(1, 2, "1", 2)], None));

        let crawl = scheduler(fetcher, FixedEpisodes::new().with(1, 2))
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(LONG, LONG),
            )
            .await
            .unwrap();

        assert_eq!(crawl.posts.len(), 2);
        assert_eq!(crawl.episode_count, Some(2));
        assert_eq!(crawl.cursors.len(), 2);
        assert!(crawl.errors.is_empty());
        assert!(crawl.halted.is_none());
    }

    #[tokio::test]
    async fn unknown_count_is_probed_until_exhausted() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        for episode in 1..=3 {
            fetcher.on_page(
                &format!("w_1_{episode}"),
                None,
                page(vec![root(1, episode, "1", 1)], None),
            );
        }

        let crawl = scheduler(fetcher.clone(), FixedEpisodes::new())
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(LONG, LONG),
            )
            .await
            .unwrap();

        assert_eq!(crawl.episode_count, Some(3));
        assert_eq!(crawl.posts.len(), 3);
        assert_eq!(fetcher.page_calls("w_1_4"), 1);
    }

    #[tokio::test]
    async fn probing_stops_at_first_failure() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher
            .on_page("w_1_1", None, page(vec![root(1, 1, "1", 1)], None))
            .on_page("w_1_2", None, Err(FetchError::Transport("reset".into())))
            .on_page("w_1_3", None, Err(FetchError::Transport("reset".into())));

        let crawl = scheduler(fetcher.clone(), FixedEpisodes::new())
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(LONG, LONG),
            )
            .await
            .unwrap();

        assert_eq!(crawl.failed_episodes(), vec![2]);
        assert_eq!(crawl.episode_count, None);
        assert!(crawl.halted.is_none());
        assert_eq!(fetcher.page_calls("w_1_3"), 0);
    }

    #[tokio::test]
    async fn failed_episode_is_recorded_and_loop_continues() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher
            .on_page("w_1_1", None, page(vec![root(1, 1, "1", 1)], None))
            .on_page("w_1_2", None, Err(FetchError::Timeout(1800)))
            .on_page("w_1_3", None, page(vec![root(1, 3, "1", 3)], None));

        let crawl = scheduler(fetcher, FixedEpisodes::new().with(1, 3))
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(LONG, LONG),
            )
            .await
            .unwrap();

        assert_eq!(crawl.failed_episodes(), vec![2]);
        assert_eq!(crawl.posts.len(), 2);
        assert!(crawl.cursors.get(2).is_none());
        assert!(crawl.halted.is_none());
    }

    #[tokio::test]
    async fn title_budget_marks_episode_in_progress_and_halts() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher
            .on_page("w_1_1", None, page(vec![root(1, 1, "1", 1)], None))
            .on_page_delayed(
                "w_1_2",
                None,
                Duration::from_secs(5),
                page(vec![root(1, 2, "1", 2)], None),
            );

        let crawl = scheduler(fetcher.clone(), FixedEpisodes::new().with(1, 3))
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(Duration::from_millis(100), LONG),
            )
            .await
            .unwrap();

        assert_eq!(crawl.halted, Some(Halt::Title));
        assert_eq!(crawl.failed_episodes(), vec![2]);
        assert_eq!(crawl.errors[&2].reason, FetchError::BudgetExceeded.to_string());
        assert!(crawl.errors[&2].cursor.is_none());
        assert_eq!(fetcher.page_calls("w_1_3"), 0);
    }

    #[tokio::test]
    async fn run_budget_stops_remaining_episodes() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page_delayed(
            "w_1_1",
            None,
            Duration::from_millis(80),
            page(vec![root(1, 1, "1", 1)], None),
        );

        let crawl = scheduler(fetcher.clone(), FixedEpisodes::new().with(1, 3))
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(LONG, Duration::from_millis(50)),
            )
            .await
            .unwrap();

        assert_eq!(crawl.halted, Some(Halt::Run));
        assert_eq!(crawl.failed_episodes(), vec![1]);
        assert_eq!(fetcher.page_calls("w_1_2"), 0);
    }

    #[tokio::test]
    async fn open_errors_are_resolved_first_and_skipped_afterwards() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher
            .on_page("w_1_1", None, page(vec![root(1, 1, "1", 1)], None))
            .on_page("w_1_2", Some("p2"), page(vec![root(1, 2, "3", 3)], None));

        let mut record = TitleRecord::new(1);
        record.errors.insert(
            2,
            CrawlErrorRecord::new("timeout", Some("p2".into()), Some(PostId::from("GW:0-w_1_2-5"))),
        );

        let crawl = scheduler(fetcher.clone(), FixedEpisodes::new().with(1, 2))
            .crawl_title(&webtoon(1), &record, CrawlMode::Incremental, &Budget::new(LONG, LONG))
            .await
            .unwrap();

        assert_eq!(crawl.resolved_episodes(), vec![2]);
        assert!(crawl.errors.is_empty());
        assert_eq!(crawl.cursors.get(2), Some(&PostId::from("GW:0-w_1_2-5")));
        assert_eq!(fetcher.page_calls("w_1_2"), 1);
        assert_eq!(fetcher.calls()[0], "w_1_2@p2");
    }

    #[tokio::test]
    async fn failed_resolution_aborts_title_untouched() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher
            .on_page("w_1_1", Some("a"), page(vec![root(1, 1, "1", 1)], None))
            .on_page("w_1_2", Some("b"), Err(FetchError::Status(500)));

        let mut record = TitleRecord::new(1);
        record.errors.insert(1, CrawlErrorRecord::new("x", Some("a".into()), None));
        record.errors.insert(2, CrawlErrorRecord::new("y", Some("b".into()), None));

        let crawl = scheduler(fetcher.clone(), FixedEpisodes::new().with(1, 3))
            .crawl_title(&webtoon(1), &record, CrawlMode::Incremental, &Budget::new(LONG, LONG))
            .await
            .unwrap();

        assert!(crawl.aborted);
        assert!(crawl.posts.is_empty());
        assert!(crawl.cleared.is_empty());
        assert_eq!(fetcher.page_calls("w_1_3"), 0);

        let mut applied = record.clone();
        crawl.apply_state(&mut applied);
        assert_eq!(applied, record);
    }

    #[tokio::test]
    async fn auth_failure_aborts() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page("w_1_1", None, Err(FetchError::Auth(403)));

        let result = scheduler(fetcher, FixedEpisodes::new().with(1, 2))
            .crawl_title(
                &webtoon(1),
                &TitleRecord::new(1),
                CrawlMode::Incremental,
                &Budget::new(LONG, LONG),
            )
            .await;

        assert!(matches!(result, Err(ref e) if e.is_auth()));
    }

    #[tokio::test]
    async fn full_mode_ignores_cursors_and_clears_errors() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.on_page(
            "w_1_1",
            None,
            page(vec![root(1, 1, "2", 2), root(1, 1, "1", 1)], None),
        );

        let mut record = TitleRecord::new(1);
        record.cursors.insert(1, PostId::from("GW:0-w_1_1-2"));
        record.errors.insert(1, CrawlErrorRecord::budget_exceeded());

        let crawl = scheduler(fetcher, FixedEpisodes::new().with(1, 1))
            .crawl_title(&webtoon(1), &record, CrawlMode::Full, &Budget::new(LONG, LONG))
            .await
            .unwrap();

        assert_eq!(crawl.posts.len(), 2);
        assert_eq!(crawl.resolved_episodes(), vec![1]);

        let mut applied = record.clone();
        crawl.apply_state(&mut applied);
        assert!(applied.errors.is_empty());
        assert_eq!(applied.cursors[&1].as_str(), "GW:0-w_1_1-2");
    }
}

// src/services/crawler.rs

//! Episode crawler.
//!
//! Walks the pages of one episode newest-first, stopping as soon as it
//! reaches posts already covered by the episode cursor.

use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{CrawlErrorRecord, CrawlerConfig, Post, PostId};
use crate::services::fetcher::{EpisodeRef, PageFetcher, PageOutcome};
use crate::services::limiter::ConcurrencyLimiter;

/// Result of crawling one episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeCrawl {
    /// The first page does not exist; only reported when probing for the
    /// episode count.
    Done,

    /// Every page was read, or the crawl caught up with the cursor.
    Success {
        posts: Vec<Post>,
        newest: Option<PostId>,
    },

    /// A page failed after all attempts.
    Fail {
        posts: Vec<Post>,
        newest: Option<PostId>,
        /// Cursor of the page that failed; `None` is the first page
        cursor: Option<String>,
        error: FetchError,
    },
}

/// Where a crawl starts and where it may stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlStart<'a> {
    /// Newest post seen by the last successful crawl
    pub known: Option<&'a PostId>,
    /// Error record to resume from
    pub resume: Option<&'a CrawlErrorRecord>,
    /// Report `Done` when the first page is missing
    pub discovery: bool,
}

#[derive(Clone, Copy)]
enum Request<'a> {
    Posts,
    Replies(&'a PostId),
}

/// Drives a [`PageFetcher`] across the pages of one episode.
#[derive(Clone)]
pub struct EpisodeCrawler {
    fetcher: Arc<dyn PageFetcher>,
    limiter: ConcurrencyLimiter,
    page_attempts: u32,
    request_delay: Duration,
}

impl EpisodeCrawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        limiter: ConcurrencyLimiter,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            page_attempts: config.page_attempts.max(1),
            request_delay: config.request_delay(),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Crawl root posts of one episode.
    ///
    /// Every returned post is strictly newer than `start.known`. The newest
    /// identifier is settled by the first page only; a resumed crawl past
    /// the first page keeps the one stored in the error record.
    pub async fn crawl(&self, episode: &EpisodeRef, start: CrawlStart<'_>) -> EpisodeCrawl {
        let known = start.known;
        let mut cursor = start.resume.and_then(|r| r.cursor.clone());
        let mut newest = start
            .resume
            .and_then(|r| r.newest.clone())
            .filter(|n| known.is_none_or(|k| n.is_newer(k)));
        let mut first_page = cursor.is_none();
        let mut posts = Vec::new();

        loop {
            let outcome = match self.fetch(episode, Request::Posts, cursor.as_deref()).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    return EpisodeCrawl::Fail {
                        posts,
                        newest,
                        cursor,
                        error,
                    };
                }
            };

            let (page, next) = match outcome {
                PageOutcome::Exhausted if first_page && start.discovery => {
                    return EpisodeCrawl::Done;
                }
                PageOutcome::Exhausted => break,
                PageOutcome::Page { posts, next } => (posts, next),
            };

            let mut caught_up = false;
            for post in page {
                if known.is_some_and(|k| !post.id.is_newer(k)) {
                    caught_up = true;
                    break;
                }
                if first_page && newest.is_none() {
                    newest = Some(post.id.clone());
                }
                posts.push(post);
            }
            first_page = false;

            if caught_up {
                log::debug!("{}: caught up with cursor", episode.page_id);
                break;
            }
            match next {
                Some(next) => {
                    cursor = Some(next);
                    self.pause().await;
                }
                None => break,
            }
        }

        EpisodeCrawl::Success { posts, newest }
    }

    /// Fetch every reply under one root post, oldest page first.
    pub async fn crawl_replies(
        &self,
        episode: &EpisodeRef,
        root_id: &PostId,
    ) -> Result<Vec<Post>, FetchError> {
        let mut cursor: Option<String> = None;
        let mut replies = Vec::new();

        loop {
            match self
                .fetch(episode, Request::Replies(root_id), cursor.as_deref())
                .await?
            {
                PageOutcome::Exhausted => break,
                PageOutcome::Page { posts, next } => {
                    replies.extend(posts);
                    match next {
                        Some(next) => {
                            cursor = Some(next);
                            self.pause().await;
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(replies)
    }

    /// One page with retries. The limiter permit covers a single attempt.
    async fn fetch(
        &self,
        episode: &EpisodeRef,
        request: Request<'_>,
        cursor: Option<&str>,
    ) -> Result<PageOutcome, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|e| FetchError::Transport(e.to_string()))?;
                match request {
                    Request::Posts => self.fetcher.fetch_page(episode, cursor).await,
                    Request::Replies(root_id) => {
                        self.fetcher.fetch_replies(episode, root_id, cursor).await
                    }
                }
            };

            match result {
                Err(error) if error.is_retryable() && attempt < self.page_attempts => {
                    log::warn!(
                        "{} (cursor {:?}) attempt {}/{} failed: {}",
                        episode.page_id,
                        cursor,
                        attempt,
                        self.page_attempts,
                        error
                    );
                    self.pause().await;
                }
                other => return other,
            }
        }
    }

    async fn pause(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}

//! Shared fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FetchError, Result};
use crate::models::{Author, ContentType, Post, PostId, Title};
use crate::services::{EpisodeRef, EpisodeSource, PageFetcher, PageOutcome};

pub type FetchResult = std::result::Result<PageOutcome, FetchError>;

pub fn webtoon(id: u64) -> Title {
    Title {
        id,
        kind: ContentType::Webtoon,
        name: format!("Title {id}"),
    }
}

/// Root post on page `w_{title}_{episode}` with the given base-36 suffix.
pub fn root(title_id: u64, episode: u32, suffix: &str, created_at: i64) -> Post {
    let id = PostId::new(format!("GW:0-w_{title_id}_{episode}-{suffix}"));
    Post {
        id: id.clone(),
        root_id: id,
        title_id,
        episode,
        created_at,
        updated_at: created_at,
        like_count: 0,
        dislike_count: 0,
        author: Author {
            id: "u1".into(),
            name: "reader".into(),
        },
        is_deleted: false,
        reply_count: 0,
        body: format!("post {suffix}"),
        is_new: true,
        replies: Vec::new(),
    }
}

/// Reply filed under `parent`.
pub fn reply(parent: &Post, suffix: &str, created_at: i64) -> Post {
    let mut post = root(parent.title_id, parent.episode, suffix, created_at);
    post.root_id = parent.id.clone();
    post
}

pub fn page(posts: Vec<Post>, next: Option<&str>) -> FetchResult {
    Ok(PageOutcome::Page {
        posts,
        next: next.map(str::to_string),
    })
}

struct Step {
    delay: Option<Duration>,
    result: FetchResult,
}

type Script = HashMap<(String, Option<String>), VecDeque<Step>>;

/// In-memory [`PageFetcher`] that replays scripted responses.
///
/// Responses are keyed by page (or root post) and cursor. The last scripted
/// response for a key repeats; unscripted keys are exhausted.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<Script>,
    replies: Mutex<Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the responses for one page request.
    pub fn on_page(&self, page_id: &str, cursor: Option<&str>, result: FetchResult) -> &Self {
        Self::set(&self.pages, page_id, cursor, None, result, true);
        self
    }

    /// Append a response for one page request.
    pub fn then_page(&self, page_id: &str, cursor: Option<&str>, result: FetchResult) -> &Self {
        Self::set(&self.pages, page_id, cursor, None, result, false);
        self
    }

    /// Replace the responses for one page request, answering after `delay`.
    pub fn on_page_delayed(
        &self,
        page_id: &str,
        cursor: Option<&str>,
        delay: Duration,
        result: FetchResult,
    ) -> &Self {
        Self::set(&self.pages, page_id, cursor, Some(delay), result, true);
        self
    }

    pub fn on_replies(&self, root_id: &PostId, cursor: Option<&str>, result: FetchResult) -> &Self {
        Self::set(&self.replies, root_id.as_str(), cursor, None, result, true);
        self
    }

    /// Every request made so far, as `page_id@cursor` or `root_id/replies@cursor`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests made for one page id, any cursor.
    pub fn page_calls(&self, page_id: &str) -> usize {
        let prefix = format!("{page_id}@");
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn set(
        script: &Mutex<Script>,
        key: &str,
        cursor: Option<&str>,
        delay: Option<Duration>,
        result: FetchResult,
        replace: bool,
    ) {
        let mut script = script.lock().unwrap();
        let steps = script
            .entry((key.to_string(), cursor.map(str::to_string)))
            .or_default();
        if replace {
            steps.clear();
        }
        steps.push_back(Step { delay, result });
    }

    async fn replay(script: &Mutex<Script>, key: &str, cursor: Option<&str>) -> FetchResult {
        let step = {
            let mut script = script.lock().unwrap();
            match script.get_mut(&(key.to_string(), cursor.map(str::to_string))) {
                Some(steps) if steps.len() > 1 => steps.pop_front().map(|s| (s.delay, s.result)),
                Some(steps) => steps.front().map(|s| (s.delay, s.result.clone())),
                None => None,
            }
        };
        match step {
            Some((delay, result)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Ok(PageOutcome::Exhausted),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, episode: &EpisodeRef, cursor: Option<&str>) -> FetchResult {
        self.record(format!("{}@{}", episode.page_id, cursor.unwrap_or("")));
        Self::replay(&self.pages, &episode.page_id, cursor).await
    }

    async fn fetch_replies(
        &self,
        _episode: &EpisodeRef,
        root_id: &PostId,
        cursor: Option<&str>,
    ) -> FetchResult {
        self.record(format!("{root_id}/replies@{}", cursor.unwrap_or("")));
        Self::replay(&self.replies, root_id.as_str(), cursor).await
    }
}

/// [`EpisodeSource`] with fixed answers per title.
#[derive(Default)]
pub struct FixedEpisodes {
    counts: Mutex<HashMap<u64, u32>>,
}

impl FixedEpisodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, title_id: u64, count: u32) -> Self {
        self.counts.lock().unwrap().insert(title_id, count);
        self
    }
}

#[async_trait]
impl EpisodeSource for FixedEpisodes {
    async fn latest_episode(&self, title: &Title) -> Result<Option<u32>> {
        Ok(self.counts.lock().unwrap().get(&title.id).copied())
    }
}

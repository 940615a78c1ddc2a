//! Persisted per-title state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::models::{Post, PostId};

/// Why and where the last crawl of an episode stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlErrorRecord {
    /// Epoch millis of the failure
    pub failed_at: i64,

    /// Last pagination cursor advanced past; `None` restarts at the first page
    #[serde(default)]
    pub cursor: Option<String>,

    /// Newest identifier taken from the first page before the failure
    #[serde(default)]
    pub newest: Option<PostId>,

    #[serde(default)]
    pub reason: String,
}

impl CrawlErrorRecord {
    pub fn new(reason: impl Into<String>, cursor: Option<String>, newest: Option<PostId>) -> Self {
        Self {
            failed_at: Utc::now().timestamp_millis(),
            cursor,
            newest,
            reason: reason.into(),
        }
    }

    /// Budget halts carry no resume detail.
    pub fn budget_exceeded() -> Self {
        Self::new(FetchError::BudgetExceeded.to_string(), None, None)
    }
}

/// Everything stored for one title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRecord {
    pub title_id: u64,

    /// Root posts with nested replies, all episodes
    #[serde(default)]
    pub posts: Vec<Post>,

    /// Open crawl errors by episode
    #[serde(default)]
    pub errors: BTreeMap<u32, CrawlErrorRecord>,

    /// Newest post seen per episode as of its last successful crawl
    #[serde(default)]
    pub cursors: BTreeMap<u32, PostId>,

    /// Roots whose replies could not be fetched yet; retried every cycle
    #[serde(default)]
    pub pending_replies: BTreeSet<PostId>,

    #[serde(default)]
    pub episode_count: Option<u32>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TitleRecord {
    pub fn new(title_id: u64) -> Self {
        Self {
            title_id,
            ..Self::default()
        }
    }

    pub fn has_open_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// No open crawl error and no replies still owed.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.pending_replies.is_empty()
    }

    /// Whether an episode has an open error or a root still owed replies.
    pub fn episode_incomplete(&self, episode: u32) -> bool {
        self.errors.contains_key(&episode)
            || self
                .posts
                .iter()
                .any(|p| p.episode == episode && self.pending_replies.contains(&p.id))
    }

    /// Root posts of one episode, or all of them.
    pub fn posts_in(&self, episode: Option<u32>) -> Vec<Post> {
        self.posts
            .iter()
            .filter(|p| episode.is_none_or(|e| p.episode == e))
            .cloned()
            .collect()
    }

    /// Roots plus replies.
    pub fn total_posts(&self) -> usize {
        self.posts.iter().map(Post::thread_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_keys_survive_json_round_trip() {
        let mut record = TitleRecord::new(9);
        record.errors.insert(3, CrawlErrorRecord::budget_exceeded());
        record.cursors.insert(2, PostId::from("GW:0-w_9_2-5"));

        let json = serde_json::to_string(&record).unwrap();
        let loaded: TitleRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded, record);
        assert!(loaded.has_open_errors());
    }

    #[test]
    fn owed_replies_leave_episode_incomplete() {
        let mut record = TitleRecord::new(9);
        record.posts.push(crate::test_utils::root(9, 2, "1", 10));
        assert!(record.is_complete());

        record.pending_replies.insert(PostId::from("GW:0-w_9_2-1"));
        assert!(!record.is_complete());
        assert!(!record.has_open_errors());
        assert!(record.episode_incomplete(2));
        assert!(!record.episode_incomplete(1));
    }

    #[test]
    fn budget_record_has_no_resume_detail() {
        let record = CrawlErrorRecord::budget_exceeded();
        assert_eq!(record.reason, FetchError::BudgetExceeded.to_string());
        assert!(record.cursor.is_none());
        assert!(record.newest.is_none());
        assert!(record.failed_at > 0);
    }
}

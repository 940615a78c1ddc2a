//! Derived count summaries and patch descriptors.

use serde::{Deserialize, Serialize};

/// Per-episode counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeCount {
    pub episode: u32,
    pub count: usize,
    pub new_count: usize,
    pub is_completed: bool,
}

/// Per-title counts. Always recomputed from the stored posts and error ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCountSummary {
    pub title_id: u64,
    pub total_count: usize,
    pub total_new_count: usize,
    pub is_completed: bool,
    pub episodes: Vec<EpisodeCount>,
}

/// Field changes a user action may apply to stored posts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

impl PostChanges {
    pub fn mark_read() -> Self {
        Self {
            is_new: Some(false),
        }
    }

    pub fn mark_unread() -> Self {
        Self { is_new: Some(true) }
    }

    pub fn is_empty(&self) -> bool {
        self.is_new.is_none()
    }
}

/// Bulk patch over a title, optionally scoped to one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    pub changes: PostChanges,
    pub title_id: u64,
    #[serde(default)]
    pub episode: Option<u32>,
}

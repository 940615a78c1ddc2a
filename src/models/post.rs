//! Post and post identifier data structures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Structured post identifier: `<prefix>:<n>-<pageId>-<suffix>`.
///
/// `pageId` encodes the content type, title and episode (`w_1_1`), and
/// `suffix` is a base-36 counter that increases within one page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The page segment between the first and last `-`, if present.
    pub fn page_id(&self) -> Option<&str> {
        let (_, rest) = self.0.split_once('-')?;
        let (page, _) = rest.rsplit_once('-')?;
        Some(page)
    }

    /// Base-36 suffix in canonical form: lowercase without leading zeros.
    /// Undecodable suffixes canonicalize to the empty string, the oldest value.
    fn suffix_digits(&self) -> String {
        let Some((_, suffix)) = self.0.rsplit_once('-') else {
            return String::new();
        };
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            log::debug!("Post id {} has no base-36 suffix", self.0);
            return String::new();
        }
        suffix.trim_start_matches('0').to_ascii_lowercase()
    }

    /// Whether `self` was posted after `other`.
    ///
    /// Suffixes compare by digit count, then digit by digit, so suffixes of
    /// any length order correctly. Only meaningful for identifiers from the
    /// same episode page; callers must not compare identifiers across
    /// episodes or titles.
    pub fn is_newer(&self, other: &PostId) -> bool {
        let (mine, theirs) = (self.suffix_digits(), other.suffix_digits());
        (mine.len(), &mine) > (theirs.len(), &theirs)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Comment author metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A single comment, root or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,

    /// Equal to `id` for root posts
    pub root_id: PostId,

    pub title_id: u64,
    pub episode: u32,

    /// Epoch millis
    pub created_at: i64,
    pub updated_at: i64,

    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub dislike_count: u32,

    #[serde(default)]
    pub author: Author,

    #[serde(default)]
    pub is_deleted: bool,

    #[serde(default)]
    pub reply_count: u32,

    #[serde(default)]
    pub body: String,

    /// Local read/unread state, never supplied by the remote
    #[serde(default = "unread")]
    pub is_new: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Post>,
}

fn unread() -> bool {
    true
}

impl Post {
    pub fn is_root(&self) -> bool {
        self.id == self.root_id
    }

    /// This post plus all of its replies.
    pub fn thread_len(&self) -> usize {
        1 + self.replies.len()
    }

    /// Unread posts in this thread, including the root.
    pub fn thread_new_count(&self) -> usize {
        usize::from(self.is_new) + self.replies.iter().filter(|r| r.is_new).count()
    }

    /// Copy the remote-owned fields of `fresh`, keeping local state and replies.
    pub fn refresh_from(&mut self, fresh: &Post) {
        self.updated_at = fresh.updated_at;
        self.like_count = fresh.like_count;
        self.dislike_count = fresh.dislike_count;
        self.author = fresh.author.clone();
        self.is_deleted = fresh.is_deleted;
        self.reply_count = fresh.reply_count;
        self.body = fresh.body.clone();
    }
}

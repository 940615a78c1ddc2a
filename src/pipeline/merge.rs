//! Reconciliation of crawled posts with the persisted store.
//!
//! The persisted copy of a post is authoritative for local state (`is_new`);
//! a fresh copy only refreshes remote-owned fields, and only when its
//! `updated_at` is strictly newer. Merging the same input twice yields the
//! same store.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::models::{Post, PostId};

/// Counters describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub dropped: usize,
    pub evicted: usize,
}

impl MergeStats {
    pub fn absorb(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.dropped += other.dropped;
        self.evicted += other.evicted;
    }
}

/// Posts indexed by identifier. Insertion order is kept until the final sort.
#[derive(Default)]
struct Arena {
    slots: Vec<Post>,
    index: HashMap<PostId, usize>,
}

impl Arena {
    fn from_posts(posts: Vec<Post>) -> Self {
        let mut arena = Self::default();
        for post in posts {
            // Duplicate ids in a stored list collapse to the first copy.
            if !arena.index.contains_key(&post.id) {
                arena.index.insert(post.id.clone(), arena.slots.len());
                arena.slots.push(post);
            }
        }
        arena
    }

    /// Insert or refresh one post, returning it for further merging.
    fn upsert(&mut self, mut fresh: Post, stats: &mut MergeStats) -> &mut Post {
        match self.index.get(&fresh.id) {
            Some(&slot) => {
                let existing = &mut self.slots[slot];
                if fresh.updated_at > existing.updated_at {
                    existing.refresh_from(&fresh);
                    stats.updated += 1;
                }
                existing
            }
            None => {
                fresh.is_new = true;
                let slot = self.slots.len();
                self.index.insert(fresh.id.clone(), slot);
                self.slots.push(fresh);
                stats.inserted += 1;
                &mut self.slots[slot]
            }
        }
    }

    fn into_posts(self) -> Vec<Post> {
        self.slots
    }
}

/// Merge fresh replies into the thread of `parent`.
///
/// Replies whose `root_id` does not name `parent` are dropped.
pub fn merge_replies(parent: &mut Post, fresh: Vec<Post>) -> MergeStats {
    let mut stats = MergeStats::default();
    let mut arena = Arena::from_posts(std::mem::take(&mut parent.replies));

    for mut reply in fresh {
        if reply.root_id != parent.id {
            log::warn!(
                "Dropping reply {}: filed under {} but belongs to {}",
                reply.id,
                parent.id,
                reply.root_id
            );
            stats.dropped += 1;
            continue;
        }
        reply.replies.clear();
        arena.upsert(reply, &mut stats);
    }

    let mut replies = arena.into_posts();
    replies.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    parent.replies = replies;
    stats
}

/// Merge freshly crawled root posts (with any fetched replies nested) into
/// the stored list.
///
/// With `cap`, only the `cap` most recent roots by `created_at` are kept.
pub fn merge_posts(
    existing: Vec<Post>,
    fresh: Vec<Post>,
    cap: Option<usize>,
) -> (Vec<Post>, MergeStats) {
    let mut stats = MergeStats::default();
    let mut arena = Arena::from_posts(existing);

    for mut post in fresh {
        if !post.is_root() {
            log::warn!(
                "Dropping {}: returned as a root post but belongs to {}",
                post.id,
                post.root_id
            );
            stats.dropped += 1;
            continue;
        }
        let replies = std::mem::take(&mut post.replies);
        let root = arena.upsert(post, &mut stats);
        if !replies.is_empty() {
            stats.absorb(merge_replies(root, replies));
        }
    }

    let mut posts = arena.into_posts();
    if let Some(cap) = cap {
        if posts.len() > cap {
            posts.sort_by_key(|p| (Reverse(p.created_at), p.id.clone()));
            stats.evicted = posts.len() - cap;
            posts.truncate(cap);
        }
    }
    posts.sort_by(|a, b| {
        (a.episode, Reverse(a.created_at), &a.id).cmp(&(b.episode, Reverse(b.created_at), &b.id))
    });
    (posts, stats)
}

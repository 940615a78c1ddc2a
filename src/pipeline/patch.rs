//! Local mutations applied outside the crawl cycle.
//!
//! Each patch is a full read-modify-write of one title entry and is
//! idempotent, so a patch racing a merge of another title is harmless.

use crate::error::Result;
use crate::models::{Post, PostChanges, PostCountSummary, PostPatch, TitleRecord};
use crate::pipeline::counts::summarize;
use crate::storage::Store;

/// Apply `changes` to one post. Returns whether anything changed.
pub fn apply_changes(post: &mut Post, changes: &PostChanges) -> bool {
    match changes.is_new {
        Some(is_new) if post.is_new != is_new => {
            post.is_new = is_new;
            true
        }
        _ => false,
    }
}

/// Apply the local state carried by `post` to its stored copy, root or
/// reply. Returns the number of posts changed.
pub fn apply_post(record: &mut TitleRecord, post: &Post) -> usize {
    let changes = PostChanges {
        is_new: Some(post.is_new),
    };
    apply_matching(record, &changes, |p| p.id == post.id)
}

/// Apply `patch.changes` to every post of the title, or of one episode.
/// Returns the number of posts changed.
pub fn apply_patch(record: &mut TitleRecord, patch: &PostPatch) -> usize {
    apply_matching(record, &patch.changes, |p| {
        patch.episode.is_none_or(|e| p.episode == e)
    })
}

fn apply_matching(
    record: &mut TitleRecord,
    changes: &PostChanges,
    matches: impl Fn(&Post) -> bool,
) -> usize {
    let mut changed = 0;
    for root in &mut record.posts {
        if matches(&*root) && apply_changes(root, changes) {
            changed += 1;
        }
        for reply in &mut root.replies {
            if matches(&*reply) && apply_changes(reply, changes) {
                changed += 1;
            }
        }
    }
    changed
}

/// Persist the local state of a single post.
pub async fn patch_post(store: &Store, post: &Post) -> Result<PostCountSummary> {
    let mut record = store.load_title(post.title_id).await?;
    if apply_post(&mut record, post) > 0 {
        store.save_title(&record).await?;
    } else {
        log::debug!("Patch for {} changed nothing", post.id);
    }
    Ok(summarize(&record))
}

/// Persist a bulk change over a title or one of its episodes.
pub async fn patch_posts(store: &Store, patch: &PostPatch) -> Result<PostCountSummary> {
    let mut record = store.load_title(patch.title_id).await?;
    if patch.changes.is_empty() {
        return Ok(summarize(&record));
    }
    let changed = apply_patch(&mut record, patch);
    if changed > 0 {
        store.save_title(&record).await?;
        log::info!(
            "Patched {} posts of title {} (episode {:?})",
            changed,
            patch.title_id,
            patch.episode
        );
    }
    Ok(summarize(&record))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::test_utils::{reply, root};

    async fn seeded() -> Store {
        let store = Store::new(Arc::new(MemoryStorage::new()));
        let mut record = TitleRecord::new(1);
        let mut parent = root(1, 1, "1", 100);
        parent.replies.push(reply(&parent, "2", 110));
        record.posts = vec![parent, root(1, 2, "1", 200)];
        store.save_title(&record).await.unwrap();
        store
    }

    #[tokio::test]
    async fn marking_a_reply_read_updates_counts() {
        let store = seeded().await;
        let record = store.load_title(1).await.unwrap();
        let mut target = record.posts[0].replies[0].clone();
        target.is_new = false;

        let summary = patch_post(&store, &target).await.unwrap();

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.total_new_count, 2);
        let stored = store.load_title(1).await.unwrap();
        assert!(!stored.posts[0].replies[0].is_new);
        assert!(stored.posts[0].is_new);
    }

    #[tokio::test]
    async fn episode_patch_is_scoped_and_idempotent() {
        let store = seeded().await;
        let patch = PostPatch {
            changes: PostChanges::mark_read(),
            title_id: 1,
            episode: Some(1),
        };

        let first = patch_posts(&store, &patch).await.unwrap();
        let second = patch_posts(&store, &patch).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_new_count, 1);
        let episode_two = first.episodes.iter().find(|e| e.episode == 2).unwrap();
        assert_eq!(episode_two.new_count, 1);
    }

    #[tokio::test]
    async fn unknown_post_changes_nothing() {
        let store = seeded().await;
        let mut stranger = root(1, 9, "z", 900);
        stranger.is_new = false;

        let summary = patch_post(&store, &stranger).await.unwrap();
        assert_eq!(summary.total_new_count, 3);
    }

    #[test]
    fn empty_changes_touch_nothing() {
        let mut post = root(1, 1, "1", 1);
        assert!(!apply_changes(&mut post, &PostChanges::default()));
        assert!(apply_changes(&mut post, &PostChanges::mark_read()));
        assert!(!apply_changes(&mut post, &PostChanges::mark_read()));
        assert!(apply_changes(&mut post, &PostChanges::mark_unread()));
    }
}

//! Derived post counts.

use std::collections::BTreeMap;

use crate::models::{EpisodeCount, PostCountSummary, TitleRecord};

/// Summarize one title. Replies count toward their root's episode.
pub fn summarize(record: &TitleRecord) -> PostCountSummary {
    let mut episodes: BTreeMap<u32, EpisodeCount> = BTreeMap::new();

    for post in &record.posts {
        let entry = episodes.entry(post.episode).or_insert_with(|| EpisodeCount {
            episode: post.episode,
            ..EpisodeCount::default()
        });
        entry.count += post.thread_len();
        entry.new_count += post.thread_new_count();
    }
    for &episode in record.errors.keys() {
        episodes.entry(episode).or_insert_with(|| EpisodeCount {
            episode,
            ..EpisodeCount::default()
        });
    }
    for count in episodes.values_mut() {
        count.is_completed = !record.episode_incomplete(count.episode);
    }

    let episodes: Vec<EpisodeCount> = episodes.into_values().collect();
    PostCountSummary {
        title_id: record.title_id,
        total_count: episodes.iter().map(|e| e.count).sum(),
        total_new_count: episodes.iter().map(|e| e.new_count).sum(),
        is_completed: record.is_complete(),
        episodes,
    }
}

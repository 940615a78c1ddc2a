//! Utility functions and helpers.

pub mod http;

use std::sync::LazyLock;

use regex::Regex;

static EPISODE_NO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[?&]no=(\d+)").ok());

/// Extract the episode number from an episode link (`...&no=12`).
pub fn extract_episode_no(href: &str) -> Option<u32> {
    EPISODE_NO
        .as_ref()?
        .captures(href)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

// src/services/episodes.rs

//! Episode-count discovery.
//!
//! Reads the public episode list of a title and reports the highest episode
//! number linked from it.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{Config, Title};
use crate::utils::extract_episode_no;
use crate::utils::http::{create_async_client, fetch_page_async};

/// Source of the latest episode number for a title.
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    /// Highest known episode, `None` when the source has no answer.
    async fn latest_episode(&self, title: &Title) -> Result<Option<u32>>;
}

/// Scrapes the episode list page.
pub struct HtmlEpisodeSource {
    client: Client,
    url_template: String,
    link_selector: String,
}

impl HtmlEpisodeSource {
    pub fn new(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.crawler)?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &Config) -> Result<Self> {
        Self::parse_selector(&config.api.episode_link_selector)?;
        Ok(Self {
            client,
            url_template: config.api.episode_list_url.clone(),
            link_selector: config.api.episode_link_selector.clone(),
        })
    }

    /// Episode list URL for a title.
    pub fn list_url(&self, title: &Title) -> String {
        self.url_template
            .replace("{kind}", title.kind.list_path())
            .replace("{title_id}", &title.id.to_string())
    }

    fn highest_episode(&self, document: &Html) -> Result<Option<u32>> {
        let selector = Self::parse_selector(&self.link_selector)?;
        Ok(document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(extract_episode_no)
            .max())
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

#[async_trait]
impl EpisodeSource for HtmlEpisodeSource {
    async fn latest_episode(&self, title: &Title) -> Result<Option<u32>> {
        let url = self.list_url(title);
        let document = fetch_page_async(&self.client, &url).await?;
        let latest = self.highest_episode(&document)?;
        log::debug!("Episode list {url}: latest episode {latest:?}");
        Ok(latest)
    }
}

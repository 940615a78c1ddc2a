//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Title;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Remote endpoints and session
    #[serde(default)]
    pub api: ApiConfig,

    /// Time budgets for one sync cycle
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Persistence policy
    #[serde(default)]
    pub storage: StorageConfig,

    /// Titles to track
    #[serde(default)]
    pub titles: Vec<Title>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply overrides from the process environment.
    ///
    /// - `COMMENT_SYNC_SESSION`: session token for the comment API
    /// - `COMMENT_SYNC_API_BASE`: base URL of the comment API
    /// - `MAX_CONCURRENT`: maximum in-flight requests
    /// - `PAGE_TIMEOUT_MS`: hard per-page timeout
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("COMMENT_SYNC_SESSION") {
            if !token.trim().is_empty() {
                self.api.session_token = Some(token);
            }
        }

        if let Ok(base) = std::env::var("COMMENT_SYNC_API_BASE") {
            if !base.trim().is_empty() {
                self.api.base_url = base;
            }
        }

        if let Ok(concurrent) = std::env::var("MAX_CONCURRENT") {
            if let Ok(n) = concurrent.parse() {
                self.crawler.max_concurrent = n;
            }
        }

        if let Ok(timeout) = std::env::var("PAGE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.crawler.page_timeout_ms = ms;
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.page_timeout_ms == 0 {
            return Err(AppError::validation("crawler.page_timeout_ms must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.page_attempts == 0 {
            return Err(AppError::validation("crawler.page_attempts must be > 0"));
        }
        if self.crawler.page_size == 0 {
            return Err(AppError::validation("crawler.page_size must be > 0"));
        }
        url::Url::parse(&self.api.base_url)?;
        scraper::Selector::parse(&self.api.episode_link_selector)
            .map_err(|e| AppError::selector(&self.api.episode_link_selector, format!("{e:?}")))?;
        if self.budget.title_secs == 0 || self.budget.run_secs == 0 {
            return Err(AppError::validation("budget ceilings must be > 0"));
        }
        if self.budget.title_secs > self.budget.run_secs {
            return Err(AppError::validation(
                "budget.title_secs must not exceed budget.run_secs",
            ));
        }
        if self.storage.retention_cap == Some(0) {
            return Err(AppError::validation("storage.retention_cap must be > 0"));
        }

        let mut seen = HashSet::new();
        for title in &self.titles {
            if !seen.insert(title.id) {
                return Err(AppError::validation(format!(
                    "title {} is listed more than once",
                    title.id
                )));
            }
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Client-wide request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Hard abort for a single comment page request
    #[serde(default = "defaults::page_timeout")]
    pub page_timeout_ms: u64,

    /// Delay between pages and between retry attempts
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Total attempts per page before the episode is marked failed
    #[serde(default = "defaults::page_attempts")]
    pub page_attempts: u32,

    /// Posts requested per page
    #[serde(default = "defaults::page_size")]
    pub page_size: u32,
}

impl CrawlerConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            page_timeout_ms: defaults::page_timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            page_attempts: defaults::page_attempts(),
            page_size: defaults::page_size(),
        }
    }
}

/// Remote comment API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the comment API
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Episode list page; `{kind}` and `{title_id}` are substituted
    #[serde(default = "defaults::episode_list_url")]
    pub episode_list_url: String,

    /// Selector for episode links on the list page
    #[serde(default = "defaults::episode_link_selector")]
    pub episode_link_selector: String,

    /// Bearer session token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            episode_list_url: defaults::episode_list_url(),
            episode_link_selector: defaults::episode_link_selector(),
            session_token: None,
        }
    }
}

/// Crawl time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling for crawling one title
    #[serde(default = "defaults::title_budget")]
    pub title_secs: u64,

    /// Ceiling for a whole sync cycle
    #[serde(default = "defaults::run_budget")]
    pub run_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            title_secs: defaults::title_budget(),
            run_secs: defaults::run_budget(),
        }
    }
}

/// Persistence policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Keep only the newest N root posts per title (legacy bounded cache).
    /// `None` keeps everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_cap: Option<usize>,
}

/// Root-post cap used by the legacy bounded-cache mode.
pub const LEGACY_RETENTION_CAP: usize = 1000;

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; comment-sync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn page_timeout() -> u64 {
        1800
    }
    pub fn request_delay() -> u64 {
        100
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn page_attempts() -> u32 {
        2
    }
    pub fn page_size() -> u32 {
        50
    }

    // API defaults
    pub fn base_url() -> String {
        "https://comments.example.com/api/v1".into()
    }
    pub fn episode_list_url() -> String {
        "https://comic.example.com/{kind}/list?titleId={title_id}".into()
    }
    pub fn episode_link_selector() -> String {
        "a[href*='no=']".into()
    }

    // Budget defaults
    pub fn title_budget() -> u64 {
        4 * 60
    }
    pub fn run_budget() -> u64 {
        30 * 60
    }
}

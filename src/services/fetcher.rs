// src/services/fetcher.rs

//! Single-page access to the remote comment API.
//!
//! A fetcher issues exactly one request per call and never retries; retry
//! policy belongs to the episode crawler.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, FetchError, Result};
use crate::models::{Author, Config, Post, PostId, Title};
use crate::utils::http::create_async_client;

/// One episode's comment page, with the context stamped onto fetched posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRef {
    pub title_id: u64,
    pub episode: u32,
    pub page_id: String,
}

impl EpisodeRef {
    pub fn new(title: &Title, episode: u32) -> Self {
        Self {
            title_id: title.id,
            episode,
            page_id: title.page_id(episode),
        }
    }
}

/// Result of a page request that reached the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Posts newest first, plus the cursor of the following page.
    Page {
        posts: Vec<Post>,
        next: Option<String>,
    },
    /// The page does not exist (HTTP 404).
    Exhausted,
}

/// Source of comment pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page of root posts for an episode.
    async fn fetch_page(
        &self,
        episode: &EpisodeRef,
        cursor: Option<&str>,
    ) -> std::result::Result<PageOutcome, FetchError>;

    /// Fetch one page of replies under a root post.
    async fn fetch_replies(
        &self,
        episode: &EpisodeRef,
        root_id: &PostId,
        cursor: Option<&str>,
    ) -> std::result::Result<PageOutcome, FetchError>;
}

#[derive(Debug, Deserialize)]
struct RemotePage {
    #[serde(default)]
    status: String,
    #[serde(default)]
    posts: Vec<RemotePost>,
    #[serde(default)]
    pagination: Option<RemotePagination>,
}

#[derive(Debug, Deserialize)]
struct RemotePagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePost {
    id: PostId,
    root_id: PostId,
    created_at: i64,
    #[serde(default)]
    updated_at: Option<i64>,
    #[serde(default)]
    like_count: u32,
    #[serde(default)]
    dislike_count: u32,
    #[serde(default)]
    author: Author,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    reply_count: u32,
    #[serde(default)]
    body: String,
}

impl RemotePost {
    fn into_post(self, episode: &EpisodeRef) -> Post {
        Post {
            id: self.id,
            root_id: self.root_id,
            title_id: episode.title_id,
            episode: episode.episode,
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
            like_count: self.like_count,
            dislike_count: self.dislike_count,
            author: self.author,
            is_deleted: self.is_deleted,
            reply_count: self.reply_count,
            body: self.body,
            is_new: true,
            replies: Vec::new(),
        }
    }
}

impl RemotePage {
    fn into_outcome(self, episode: &EpisodeRef) -> std::result::Result<PageOutcome, FetchError> {
        if self.status != "success" {
            return Err(FetchError::Malformed(format!(
                "status '{}' for page {}",
                self.status, episode.page_id
            )));
        }
        let next = self
            .pagination
            .and_then(|p| p.next)
            .filter(|n| !n.is_empty());
        let posts = self
            .posts
            .into_iter()
            .map(|p| p.into_post(episode))
            .collect();
        Ok(PageOutcome::Page { posts, next })
    }
}

/// `reqwest` implementation against the JSON comment API.
pub struct HttpPageFetcher {
    client: Client,
    base_url: Url,
    page_size: u32,
    session_token: Option<String>,
    page_timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.crawler)?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.api.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::config(format!(
                "api.base_url '{}' cannot carry a path",
                config.api.base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            page_size: config.crawler.page_size,
            session_token: config.api.session_token.clone(),
            page_timeout: config.crawler.page_timeout(),
        })
    }

    fn endpoint(&self, segments: &[&str], cursor: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("next", cursor);
            }
        }
        url
    }

    async fn request(
        &self,
        mut url: Url,
        extra_query: Option<(&str, &str)>,
        episode: &EpisodeRef,
    ) -> std::result::Result<PageOutcome, FetchError> {
        if let Some((key, value)) = extra_query {
            url.query_pairs_mut().append_pair(key, value);
        }
        log::debug!("GET {url}");

        let mut request = self.client.get(url);
        if let Some(token) = &self.session_token {
            request = request.bearer_auth(token);
        }

        let timeout_ms = self.page_timeout.as_millis() as u64;
        let call = async {
            let response = request.send().await.map_err(|e| transport(e, timeout_ms))?;
            let status = response.status();
            match status {
                StatusCode::NOT_FOUND => return Ok(PageOutcome::Exhausted),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(FetchError::Auth(status.as_u16()));
                }
                s if !s.is_success() => return Err(FetchError::Status(s.as_u16())),
                _ => {}
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| transport(e, timeout_ms))?;
            let page: RemotePage = serde_json::from_slice(&bytes)
                .map_err(|e| FetchError::Malformed(e.to_string()))?;
            page.into_outcome(episode)
        };

        tokio::time::timeout(self.page_timeout, call)
            .await
            .map_err(|_| FetchError::Timeout(timeout_ms))?
    }
}

fn transport(error: reqwest::Error, timeout_ms: u64) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(timeout_ms)
    } else {
        FetchError::Transport(error.to_string())
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(
        &self,
        episode: &EpisodeRef,
        cursor: Option<&str>,
    ) -> std::result::Result<PageOutcome, FetchError> {
        let url = self.endpoint(&["posts"], cursor);
        self.request(url, Some(("pageId", &episode.page_id)), episode)
            .await
    }

    async fn fetch_replies(
        &self,
        episode: &EpisodeRef,
        root_id: &PostId,
        cursor: Option<&str>,
    ) -> std::result::Result<PageOutcome, FetchError> {
        let url = self.endpoint(&["posts", root_id.as_str(), "replies"], cursor);
        self.request(url, None, episode).await
    }
}

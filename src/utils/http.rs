// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use scraper::Html;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a page asynchronously and parse it as HTML.
///
/// Non-success statuses are errors; 401/403 surface as [`AppError::Auth`].
pub async fn fetch_page_async(client: &reqwest::Client, url: &str) -> Result<Html> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(AppError::Auth(format!("{url} returned {status}")));
    }
    let text = response.error_for_status()?.text().await?;
    Ok(Html::parse_document(&text))
}

// src/error.rs

//! Unified error handling for the sync engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A stored entry did not match the expected schema
    #[error("Schema error in '{key}': {message}")]
    Schema { key: String, message: String },

    /// Remote fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Remote session missing or rejected; the cycle is aborted
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Requested title is not tracked
    #[error("Unknown title: {0}")]
    UnknownTitle(u64),

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a schema error for a storage key.
    pub fn schema(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Schema {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error should abort the whole sync cycle.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Fetch(FetchError::Auth(_)))
    }
}

/// Failure of a single remote page request.
///
/// "Exhausted" (HTTP 404) is not an error and is reported through
/// [`PageOutcome::Exhausted`](crate::services::PageOutcome) instead.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchError {
    /// The hard page timeout fired and the request was abandoned
    #[error("request aborted after {0} ms")]
    Timeout(u64),

    /// Payload did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Session missing or rejected by the remote
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    /// Any other non-success status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Connection-level failure before a status was received
    #[error("transport error: {0}")]
    Transport(String),

    /// A crawl budget ran out while the request was in progress
    #[error("time budget exceeded")]
    BudgetExceeded,
}

impl FetchError {
    /// Auth failures are surfaced instead of retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth(_) | Self::BudgetExceeded)
    }
}

// src/models/mod.rs

//! Domain models for the sync engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod post;
mod record;
mod summary;
mod title;

// Re-export all public types
pub use config::{
    ApiConfig, BudgetConfig, Config, CrawlerConfig, LEGACY_RETENTION_CAP, StorageConfig,
};
pub use post::{Author, Post, PostId};
pub use record::{CrawlErrorRecord, TitleRecord};
pub use summary::{EpisodeCount, PostChanges, PostCountSummary, PostPatch};
pub use title::{ContentType, Title};

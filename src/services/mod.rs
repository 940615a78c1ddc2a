//! Service layer for the sync engine.
//!
//! This module contains the remote-facing pieces:
//! - Request bounding (`ConcurrencyLimiter`)
//! - Single-page access (`PageFetcher`, `HttpPageFetcher`)
//! - Multi-page episode crawling (`EpisodeCrawler`)
//! - Episode-count and title discovery (`EpisodeSource`, `TitleSource`)

pub mod crawler;
pub mod episodes;
pub mod fetcher;
pub mod limiter;
pub mod titles;

pub use crawler::{CrawlStart, EpisodeCrawl, EpisodeCrawler};
pub use episodes::{EpisodeSource, HtmlEpisodeSource};
pub use fetcher::{EpisodeRef, HttpPageFetcher, PageFetcher, PageOutcome};
pub use limiter::{ConcurrencyLimiter, RequestPermit};
pub use titles::{ConfigTitleSource, TitleSource};

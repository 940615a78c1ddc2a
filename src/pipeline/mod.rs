//! Sync pipeline.
//!
//! - `cursor`: per-episode newest-seen ledger
//! - `schedule`: per-title crawl under time budgets
//! - `orchestrate`: whole-cycle driver and run guard
//! - `merge`: reconciliation with the persisted store
//! - `patch`: local read/unread mutations
//! - `counts`: derived unread counts

pub mod counts;
pub mod cursor;
pub mod merge;
pub mod orchestrate;
pub mod patch;
pub mod schedule;

pub use counts::summarize;
pub use cursor::CursorLedger;
pub use merge::{MergeStats, merge_posts, merge_replies};
pub use orchestrate::{CycleGuard, CycleReport, RunGuard, TitleOrchestrator, TitleReport};
pub use patch::{patch_post, patch_posts};
pub use schedule::{Budget, CrawlMode, CrawlScheduler, Halt, TitleCrawl};

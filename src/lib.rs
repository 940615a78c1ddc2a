// src/lib.rs

//! comment-sync library
//!
//! Incremental comment synchronization: crawls a paginated comment API for
//! tracked titles, merges new posts into per-title storage without losing
//! local read state, and derives unread counts.

pub mod engine;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

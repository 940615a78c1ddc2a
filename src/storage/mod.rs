//! Storage abstractions for title state persistence.
//!
//! The durable layer is a plain key-value store. Each tracked title is a
//! single entry replaced atomically on every write, so the store is sharded
//! by title:
//!
//! ```text
//! {root}/
//! ├── titles.json           # Tracked title list
//! └── titles/
//!     ├── 183559.json       # Posts, cursors and error ledger of one title
//!     └── 747269.json
//! ```
//!
//! Entries are wrapped in a versioned envelope (`{"schema": "v1", "data": ...}`)
//! and validated on load; anything else is rejected as a schema error.

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Title, TitleRecord};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "s3")]
pub use s3::S3Storage;

/// Byte-level key-value backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` if the key was never written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a value in one step.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Human-readable location of a key, for logs.
    fn location(&self, key: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SchemaVersion {
    #[serde(rename = "v1")]
    V1,
}

/// Versioned wrapper around every stored value.
///
/// Must stay a plain struct. An internally tagged enum decodes through
/// buffered content, which keeps map keys as strings and rejects the integer
/// episode keys of a title record.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    schema: SchemaVersion,
    data: T,
}

impl<T> Envelope<T> {
    fn v1(data: T) -> Self {
        Self {
            schema: SchemaVersion::V1,
            data,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TitleList<T> {
    titles: T,
}

/// Key of the tracked title list.
pub const TITLES_KEY: &str = "titles.json";

/// Key of one title's entry.
pub fn title_key(title_id: u64) -> String {
    format!("titles/{title_id}.json")
}

/// Typed, schema-checked access to engine state.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvStore>,
}

impl Store {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn location(&self, key: &str) -> String {
        self.kv.location(key)
    }

    /// Load one title's entry; a title never written starts empty.
    pub async fn load_title(&self, title_id: u64) -> Result<TitleRecord> {
        let key = title_key(title_id);
        let Some(bytes) = self.kv.get(&key).await? else {
            return Ok(TitleRecord::new(title_id));
        };

        let record = serde_json::from_slice::<Envelope<TitleRecord>>(&bytes)
            .map_err(|e| AppError::schema(&key, e))?
            .data;

        if record.title_id != title_id {
            return Err(AppError::schema(
                &key,
                format!("entry belongs to title {}", record.title_id),
            ));
        }
        if let Some(orphan) = record
            .posts
            .iter()
            .flat_map(|p| p.replies.iter().map(move |r| (p, r)))
            .find(|(root, reply)| reply.root_id != root.id)
        {
            return Err(AppError::schema(
                &key,
                format!("reply {} is filed under {}", orphan.1.id, orphan.0.id),
            ));
        }
        Ok(record)
    }

    /// Replace one title's entry.
    pub async fn save_title(&self, record: &TitleRecord) -> Result<()> {
        let key = title_key(record.title_id);
        let mut stamped = record.clone();
        stamped.updated_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&Envelope::v1(&stamped))?;
        self.kv.set(&key, &bytes).await?;
        log::debug!(
            "Saved {} posts for title {} to {}",
            stamped.total_posts(),
            stamped.title_id,
            self.kv.location(&key)
        );
        Ok(())
    }

    /// Load the tracked title list.
    pub async fn load_titles(&self) -> Result<Vec<Title>> {
        let Some(bytes) = self.kv.get(TITLES_KEY).await? else {
            return Ok(Vec::new());
        };
        let list = serde_json::from_slice::<Envelope<TitleList<Vec<Title>>>>(&bytes)
            .map_err(|e| AppError::schema(TITLES_KEY, e))?
            .data;
        Ok(list.titles)
    }

    /// Replace the tracked title list.
    pub async fn save_titles(&self, titles: &[Title]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&Envelope::v1(TitleList { titles }))?;
        self.kv.set(TITLES_KEY, &bytes).await
    }
}

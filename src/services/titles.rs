//! Tracked-title discovery.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Config, Title};

/// Discovery step producing the list of tracked titles.
#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<Title>>;
}

/// Titles declared in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigTitleSource {
    titles: Vec<Title>,
}

impl ConfigTitleSource {
    pub fn new(titles: Vec<Title>) -> Self {
        Self { titles }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.titles.clone())
    }
}

#[async_trait]
impl TitleSource for ConfigTitleSource {
    async fn discover(&self) -> Result<Vec<Title>> {
        log::info!("Discovered {} tracked titles from config", self.titles.len());
        Ok(self.titles.clone())
    }
}

//! Proxy Harvest - Selector-driven Proxy Harvester
//!
//! Harvests proxy candidates from configured web pages with declarative extraction
//! rules and keeps them in a SQLite store mirrored in memory.

pub mod database;
pub mod errors;
pub mod harvest;
pub mod proxy;

pub use database::MirroredStore;
pub use errors::{CollectError, SourceError, StorageError};
pub use harvest::{HarvestConfig, HarvestSummary, Harvester};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    pub database_url: String,
    /// Bucket (table) holding harvested proxies
    pub bucket: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "proxies.db".to_string(),
            bucket: "proxies".to_string(),
        }
    }
}

impl Config {
    /// Open the store this configuration points at
    pub async fn open_store(&self) -> Result<MirroredStore> {
        Ok(MirroredStore::open(&self.database_url, &self.bucket).await?)
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::key::{CacheKey, ResourceType, Scope};
use super::store::CacheStore;

/// Persisted entries older than this are hydrated as stale.
const CACHE_STALE_MINUTES: i64 = 60;

const CACHE_FILE: &str = "cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    resource: ResourceType,
    scope: Scope,
    qualifier: Value,
    value: Value,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: Vec<PersistedEntry>,
}

/// Writes the store to disk so the next launch can render cached data before
/// the first fetch completes.
pub struct CachePersister {
    cache_dir: PathBuf,
}

impl CachePersister {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    /// Save every entry that is not marked stale. Returns the count written.
    pub fn save(&self, store: &CacheStore) -> Result<usize> {
        let entries: Vec<PersistedEntry> = store
            .export()
            .into_iter()
            .filter(|(_, _, _, stale)| !stale)
            .map(|(key, value, fetched_at, _)| PersistedEntry {
                resource: key.resource(),
                scope: key.scope(),
                qualifier: key.qualifier().clone(),
                value,
                cached_at: fetched_at.unwrap_or_else(Utc::now),
            })
            .collect();

        let count = entries.len();
        let contents = serde_json::to_string_pretty(&CacheFile { entries })?;
        std::fs::write(self.cache_path(), contents).context("Failed to write cache file")?;
        debug!(count, "Persisted cache entries");
        Ok(count)
    }

    /// Hydrate `store` from disk. A missing file is not an error.
    pub fn load(&self, store: &CacheStore) -> Result<usize> {
        let path = self.cache_path();
        if !path.exists() {
            return Ok(0);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read cache file")?;
        let file: CacheFile =
            serde_json::from_str(&contents).context("Failed to parse cache file")?;

        let now = Utc::now();
        let count = file.entries.len();
        for entry in file.entries {
            let stale = (now - entry.cached_at).num_minutes() > CACHE_STALE_MINUTES;
            let key = CacheKey::from_value(entry.resource, entry.scope, entry.qualifier);
            store.hydrate(key, entry.value, entry.cached_at, stale);
        }
        debug!(count, "Hydrated cache entries from disk");
        Ok(count)
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.cache_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

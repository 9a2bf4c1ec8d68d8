//! Persisted album cache (`structure.json`).

use crate::models::CacheStructure;
use crate::Result;
use core_runtime::persist;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<CacheStructure>> {
        Ok(persist::read_json(&self.path).await?)
    }

    /// For the read path: any problem is logged and reads as "no cache".
    pub async fn load_quiet(&self) -> Option<CacheStructure> {
        match self.load().await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache file unreadable");
                None
            }
        }
    }

    /// Replaces the file atomically; readers never see a partial write.
    pub async fn save(&self, cache: &CacheStructure) -> Result<()> {
        persist::write_json_atomic(&self.path, cache).await?;
        Ok(())
    }
}

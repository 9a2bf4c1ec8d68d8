//! # Orphan Collector
//!
//! Garbage collection for the images directory. The valid key set is
//! recomputed from scratch every pass, so the collector must only run after
//! a pass has seen the complete tree; given a partial set it would delete
//! live derivatives.

use crate::derivative::DerivativeStore;
use crate::Result;
use core_runtime::persist;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    /// Derivatives deleted because no valid key references them
    pub removed: Vec<String>,
    pub temp_removed: usize,
    /// Deletions that failed; the files are retried next pass
    pub failed: usize,
}

pub struct OrphanCollector {
    store: DerivativeStore,
}

impl OrphanCollector {
    pub fn new(store: DerivativeStore) -> Self {
        Self { store }
    }

    /// Delete every derivative whose key is not in `valid_keys`, plus any
    /// leftover temp files. Files that are not derivatives are left alone.
    #[instrument(skip(self, valid_keys), fields(valid = valid_keys.len()))]
    pub async fn collect(&self, valid_keys: &HashSet<String>) -> Result<CollectionReport> {
        let dir = self.store.images_dir();
        let mut report = CollectionReport::default();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Images directory does not exist yet");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if persist::is_temp_file(name) {
                if remove(&entry.path()).await {
                    report.temp_removed += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            }

            let Some(key) = self.store.key_from_file_name(name) else {
                continue;
            };
            if valid_keys.contains(key) {
                continue;
            }

            if remove(&entry.path()).await {
                report.removed.push(key.to_string());
            } else {
                report.failed += 1;
            }
        }

        report.removed.sort();
        if !report.removed.is_empty() || report.temp_removed > 0 {
            info!(
                removed = report.removed.len(),
                temp_removed = report.temp_removed,
                failed = report.failed,
                "Orphaned derivatives removed"
            );
        }
        Ok(report)
    }
}

async fn remove(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete orphan");
            false
        }
    }
}

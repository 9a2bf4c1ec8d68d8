//! # Single-Flight Lock
//!
//! A marker file (`sync.lock`) that says "a pass is running". It lives on
//! disk rather than in memory so that a pass started by a previous process
//! is still seen after a restart.
//!
//! Acquisition is `create_new`, so two callers racing for an absent marker
//! cannot both win. A marker older than `stale_after` belongs to a pass
//! that crashed and is reclaimed: it is renamed aside first, so of several
//! reclaimers only one moves it, and a fresh marker taken by mistake is put
//! back.

use crate::{Result, SyncError};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Contents of the marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMarker {
    pub owner: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Proof of ownership returned by [`SyncLock::acquire`].
#[derive(Debug)]
#[must_use = "the lock must be released with SyncLock::release"]
pub struct LockGuard {
    owner: String,
    acquired_at: DateTime<Utc>,
}

impl LockGuard {
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

pub struct SyncLock {
    path: PathBuf,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
}

impl SyncLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            stale_after,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current marker, if any. An unreadable marker (e.g. caught between
    /// create and write) is reported with its file mtime and no owner.
    pub async fn holder(&self) -> Result<Option<LockMarker>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Ok(marker) = serde_json::from_slice::<LockMarker>(&bytes) {
            return Ok(Some(marker));
        }

        let modified = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(LockMarker {
            owner: String::new(),
            pid: 0,
            acquired_at: modified.into(),
        }))
    }

    fn marker_is_stale(&self, marker: &LockMarker) -> bool {
        let age = self.clock.now() - marker.acquired_at;
        age.to_std().map(|age| age > self.stale_after).unwrap_or(false)
    }

    /// True when a marker exists and is older than the threshold.
    pub async fn is_stale(&self) -> Result<bool> {
        Ok(self
            .holder()
            .await?
            .map(|marker| self.marker_is_stale(&marker))
            .unwrap_or(false))
    }

    pub async fn acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Second round only happens after a stale marker was removed.
        for _ in 0..2 {
            let marker = LockMarker {
                owner: Uuid::new_v4().to_string(),
                pid: std::process::id(),
                acquired_at: self.clock.now(),
            };

            match self.create_marker(&marker).await {
                Ok(()) => {
                    debug!(owner = %marker.owner, "Sync lock acquired");
                    return Ok(LockGuard {
                        owner: marker.owner,
                        acquired_at: marker.acquired_at,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let Some(existing) = self.holder().await? else {
                // Released between our create and read; just try again.
                continue;
            };

            if !self.marker_is_stale(&existing) {
                return Err(SyncError::AlreadyRunning {
                    since: existing.acquired_at.to_rfc3339(),
                });
            }

            warn!(
                owner = %existing.owner,
                pid = existing.pid,
                acquired_at = %existing.acquired_at,
                "Reclaiming stale sync lock"
            );
            self.reclaim(&existing).await?;
        }

        let since = self
            .holder()
            .await?
            .map(|marker| marker.acquired_at.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        Err(SyncError::AlreadyRunning { since })
    }

    /// Take a stale marker out of the way without touching a live one that
    /// replaced it after `stale` was read.
    async fn reclaim(&self, stale: &LockMarker) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let aside = self
            .path
            .with_file_name(format!(".{}.{}.stale", file_name, Uuid::new_v4().simple()));

        match tokio::fs::rename(&self.path, &aside).await {
            Ok(()) => {}
            // Another reclaimer moved it first
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let moved_owner = match tokio::fs::read(&aside).await {
            Ok(bytes) => serde_json::from_slice::<LockMarker>(&bytes)
                .map(|marker| marker.owner)
                .unwrap_or_default(),
            Err(e) => return Err(e.into()),
        };

        if moved_owner != stale.owner {
            warn!(
                owner = %moved_owner,
                "Moved a live sync lock while reclaiming, restoring it"
            );
            match tokio::fs::hard_link(&aside, &self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        match tokio::fs::remove_file(&aside).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_marker(&self, marker: &LockMarker) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        let json = serde_json::to_vec(marker)?;
        file.write_all(&json).await?;
        file.sync_all().await
    }

    /// Remove the marker. A marker that now belongs to someone else (ours
    /// went stale and was reclaimed) is left in place.
    pub async fn release(&self, guard: LockGuard) -> Result<()> {
        match self.holder().await? {
            Some(marker) if !marker.owner.is_empty() && marker.owner != guard.owner => {
                warn!(
                    ours = %guard.owner,
                    current = %marker.owner,
                    "Sync lock was reclaimed by another pass, leaving it"
                );
                Ok(())
            }
            Some(_) => {
                match tokio::fs::remove_file(&self.path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                let held_for = self.clock.now() - guard.acquired_at;
                info!(held_for_ms = held_for.num_milliseconds(), "Sync lock released");
                Ok(())
            }
            None => {
                warn!("Sync lock marker already gone at release");
                Ok(())
            }
        }
    }
}

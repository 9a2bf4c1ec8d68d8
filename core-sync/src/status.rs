//! # System Status
//!
//! `status.json` is what pollers read to show progress: the overall system
//! state, the state of the current or last pass, a capped log of
//! timestamped lines and the last error.
//!
//! All writes go through [`StatusStore`], which serializes
//! read-modify-write cycles within the process and persists atomically.

use crate::{Result, SyncError};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::persist;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Overall health of the mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    /// No root folder configured yet
    #[default]
    Setup,
    /// Remote credentials rejected; operator must re-authenticate
    Maintenance,
    Active,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Setup => "SETUP",
            SystemState::Maintenance => "MAINTENANCE",
            SystemState::Active => "ACTIVE",
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of the current or most recent pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    #[default]
    Idle,
    /// Tree build and derivative materialization
    Syncing,
    /// Downstream rebuild, reported by a publish hook
    Building,
    /// Downstream publish, reported by a publish hook
    Deploying,
    Success,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "IDLE",
            SyncState::Syncing => "SYNCING",
            SyncState::Building => "BUILDING",
            SyncState::Deploying => "DEPLOYING",
            SyncState::Success => "SUCCESS",
            SyncState::Error => "ERROR",
        }
    }

    /// A pass is between start and finish.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Syncing | SyncState::Building | SyncState::Deploying
        )
    }

    pub fn validate_transition(&self, to: SyncState) -> Result<()> {
        let valid = match (*self, to) {
            // Starting a pass
            (SyncState::Idle, SyncState::Syncing) => true,
            (SyncState::Success, SyncState::Syncing) => true,
            (SyncState::Error, SyncState::Syncing) => true,

            // Forward progress
            (SyncState::Syncing, SyncState::Building) => true,
            (SyncState::Syncing, SyncState::Success) => true,
            (SyncState::Building, SyncState::Deploying) => true,
            (SyncState::Building, SyncState::Success) => true,
            (SyncState::Deploying, SyncState::Success) => true,

            // ERROR is reachable from every non-terminal state
            (from, SyncState::Error) => from.is_active() || from == SyncState::Idle,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self.as_str(), to.as_str()),
            });
        }

        Ok(())
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemStatus {
    pub state: SystemState,
    pub sync_state: SyncState,
    /// Oldest first
    pub sync_log: Vec<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

pub struct StatusStore {
    path: PathBuf,
    capacity: usize,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or corrupt file reads as the default status (SETUP / IDLE).
    pub async fn load(&self) -> SystemStatus {
        match persist::read_json::<SystemStatus>(&self.path).await {
            Ok(Some(status)) => status,
            Ok(None) => SystemStatus::default(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Status file unreadable, using defaults"
                );
                SystemStatus::default()
            }
        }
    }

    /// Apply `f` to the current status and persist the result.
    pub async fn update<F>(&self, f: F) -> Result<SystemStatus>
    where
        F: FnOnce(&mut SystemStatus),
    {
        let _guard = self.write_lock.lock().await;
        let mut status = self.load().await;
        f(&mut status);
        persist::write_json_atomic(&self.path, &status).await?;
        Ok(status)
    }

    fn push_line(&self, status: &mut SystemStatus, message: &str) {
        let line = format!("[{}] {}", self.clock.now().format("%Y-%m-%d %H:%M:%S"), message);
        status.sync_log.push(line);
        if status.sync_log.len() > self.capacity {
            let excess = status.sync_log.len() - self.capacity;
            status.sync_log.drain(..excess);
        }
    }

    pub async fn append_log(&self, message: &str) -> Result<()> {
        self.update(|status| self.push_line(status, message)).await?;
        Ok(())
    }

    /// Move the pass to `to` and log `message`. Re-entering the current
    /// active state only logs.
    pub async fn transition(&self, to: SyncState, message: &str) -> Result<SystemStatus> {
        self.transition_with(to, message, |_| {}).await
    }

    /// [`StatusStore::transition`] plus extra field updates in the same write.
    pub async fn transition_with<F>(
        &self,
        to: SyncState,
        message: &str,
        f: F,
    ) -> Result<SystemStatus>
    where
        F: FnOnce(&mut SystemStatus),
    {
        let _guard = self.write_lock.lock().await;
        let mut status = self.load().await;

        let from = status.sync_state;
        if !(from == to && to.is_active()) {
            from.validate_transition(to)?;
        }

        status.sync_state = to;
        self.push_line(&mut status, message);
        f(&mut status);
        persist::write_json_atomic(&self.path, &status).await?;

        debug!(from = %from, to = %to, "Sync state changed");
        Ok(status)
    }

    /// Record an error and timestamp without touching the pass state.
    pub async fn record_error(&self, message: &str) -> Result<()> {
        let now = self.clock.now();
        self.update(|status| {
            self.push_line(status, message);
            status.last_error = Some(message.to_string());
            status.last_error_time = Some(now);
        })
        .await?;
        Ok(())
    }

    /// Returns the previous state.
    pub async fn set_system_state(&self, state: SystemState) -> Result<SystemState> {
        let mut previous = state;
        self.update(|status| {
            previous = status.state;
            status.state = state;
        })
        .await?;
        Ok(previous)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

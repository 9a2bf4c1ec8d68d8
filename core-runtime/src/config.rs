//! # Configuration
//!
//! Two layers of configuration drive the mirror:
//!
//! - [`MirrorConfig`]: process-level settings chosen by the host (where files
//!   live, concurrency, timeouts). Built in code with [`MirrorConfigBuilder`],
//!   validated fail-fast.
//! - [`AppConfig`]: the operator-editable JSON document (`config.json`) with
//!   the remote root folder, cover folder, auto-sync interval and whatever
//!   presentation settings the admin UI stores. Loaded and saved through
//!   [`ConfigStore`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ConfigStore, MirrorConfig};
//! use std::time::Duration;
//!
//! let config = MirrorConfig::builder()
//!     .data_dir("/var/lib/gallery/cache")
//!     .images_dir("/var/lib/gallery/public/images")
//!     .debounce_delay(Duration::from_secs(10))
//!     .build()?;
//!
//! let app = ConfigStore::new(config.config_file()).load().await?;
//! ```

use crate::error::{Error, Result};
use crate::persist;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CACHE_FILE_NAME: &str = "structure.json";
pub const STATUS_FILE_NAME: &str = "status.json";
pub const LOCK_FILE_NAME: &str = "sync.lock";

const DEFAULT_MAX_CONCURRENT_TRANSCODES: usize = 5;
const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(30 * 60);
const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_STATUS_LOG_CAPACITY: usize = 50;
const DEFAULT_MAX_TREE_DEPTH: usize = 64;

/// Process-level mirror configuration.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Holds `config.json`, `structure.json`, `status.json` and `sync.lock`
    pub data_dir: PathBuf,

    /// Directory the derivatives are written to and served from
    pub images_dir: PathBuf,

    /// URL path under which `images_dir` is served (e.g. `/images`)
    pub public_images_prefix: String,

    /// Prefix completed with a file id to proxy an image that has no local
    /// derivative (e.g. `/api/image?id=`)
    pub proxy_url_prefix: String,

    /// Upper bound on concurrent download+transcode jobs
    pub max_concurrent_transcodes: usize,

    /// Age after which a lock marker is considered abandoned
    pub lock_stale_after: Duration,

    /// Quiet period before a change notification starts a pass
    pub debounce_delay: Duration,

    /// Number of status log lines retained
    pub status_log_capacity: usize,

    /// Folder nesting limit for the tree walk
    pub max_tree_depth: usize,
}

impl MirrorConfig {
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::default()
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE_NAME)
    }

    pub fn status_file(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE_NAME)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE_NAME)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.images_dir.as_os_str().is_empty() {
            return Err(Error::Config("Images directory cannot be empty".to_string()));
        }

        if self.public_images_prefix.is_empty() || self.proxy_url_prefix.is_empty() {
            return Err(Error::Config(
                "Public image prefix and proxy URL prefix must both be set".to_string(),
            ));
        }

        if !(1..=64).contains(&self.max_concurrent_transcodes) {
            return Err(Error::Config(format!(
                "max_concurrent_transcodes must be between 1 and 64, got {}",
                self.max_concurrent_transcodes
            )));
        }

        if self.lock_stale_after.is_zero() {
            return Err(Error::Config(
                "Lock staleness threshold must be greater than zero".to_string(),
            ));
        }

        if self.status_log_capacity == 0 {
            return Err(Error::Config(
                "Status log capacity must be at least 1".to_string(),
            ));
        }

        if self.max_tree_depth == 0 {
            return Err(Error::Config("Tree depth limit must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Builder for [`MirrorConfig`].
#[derive(Debug, Default)]
pub struct MirrorConfigBuilder {
    data_dir: Option<PathBuf>,
    images_dir: Option<PathBuf>,
    public_images_prefix: Option<String>,
    proxy_url_prefix: Option<String>,
    max_concurrent_transcodes: Option<usize>,
    lock_stale_after: Option<Duration>,
    debounce_delay: Option<Duration>,
    status_log_capacity: Option<usize>,
    max_tree_depth: Option<usize>,
}

impl MirrorConfigBuilder {
    pub fn data_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Defaults to `<data_dir>/images`.
    pub fn images_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.images_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn public_images_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_images_prefix = Some(prefix.into());
        self
    }

    pub fn proxy_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.proxy_url_prefix = Some(prefix.into());
        self
    }

    pub fn max_concurrent_transcodes(mut self, limit: usize) -> Self {
        self.max_concurrent_transcodes = Some(limit);
        self
    }

    pub fn lock_stale_after(mut self, threshold: Duration) -> Self {
        self.lock_stale_after = Some(threshold);
        self
    }

    pub fn debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = Some(delay);
        self
    }

    pub fn status_log_capacity(mut self, capacity: usize) -> Self {
        self.status_log_capacity = Some(capacity);
        self
    }

    pub fn max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = Some(depth);
        self
    }

    pub fn build(self) -> Result<MirrorConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;
        let images_dir = self.images_dir.unwrap_or_else(|| data_dir.join("images"));

        let config = MirrorConfig {
            data_dir,
            images_dir,
            public_images_prefix: self
                .public_images_prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "/images".to_string()),
            proxy_url_prefix: self
                .proxy_url_prefix
                .unwrap_or_else(|| "/api/image?id=".to_string()),
            max_concurrent_transcodes: self
                .max_concurrent_transcodes
                .unwrap_or(DEFAULT_MAX_CONCURRENT_TRANSCODES),
            lock_stale_after: self.lock_stale_after.unwrap_or(DEFAULT_LOCK_STALE_AFTER),
            debounce_delay: self.debounce_delay.unwrap_or(DEFAULT_DEBOUNCE_DELAY),
            status_log_capacity: self
                .status_log_capacity
                .unwrap_or(DEFAULT_STATUS_LOG_CAPACITY),
            max_tree_depth: self.max_tree_depth.unwrap_or(DEFAULT_MAX_TREE_DEPTH),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Order photos are listed in within an album.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Operator-editable configuration document.
///
/// Unknown keys (theme colors, grid columns, footer text...) are kept in
/// [`AppConfig::extra`] and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub root_folder_id: String,

    pub site_title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub covers_folder_id: Option<String>,

    /// Album id to cover image URL
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub folder_covers: BTreeMap<String, String>,

    /// Minutes between automatic passes triggered by readers; 0 disables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_sync_interval: Option<u64>,

    pub photo_sort_order: SortOrder,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub og_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seasonal_custom_icon: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_folder_id: String::new(),
            site_title: "Photo Catalog".to_string(),
            covers_folder_id: None,
            folder_covers: BTreeMap::new(),
            auto_sync_interval: None,
            photo_sort_order: SortOrder::Asc,
            background_image: None,
            favicon: None,
            og_image: None,
            seasonal_custom_icon: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl AppConfig {
    /// Configured root folder, ignoring blank values.
    pub fn root_folder(&self) -> Option<&str> {
        Some(self.root_folder_id.trim()).filter(|id| !id.is_empty())
    }

    pub fn covers_folder(&self) -> Option<&str> {
        self.covers_folder_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// `None` when auto-sync is disabled.
    pub fn auto_sync_every(&self) -> Option<Duration> {
        self.auto_sync_interval
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }
}

/// Loads and saves [`AppConfig`] as JSON.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file yields defaults; missing keys are filled with defaults.
    pub async fn load(&self) -> Result<AppConfig> {
        match persist::read_json::<AppConfig>(&self.path).await {
            Ok(Some(config)) => Ok(config),
            Ok(None) => {
                debug!(path = %self.path.display(), "No config file, using defaults");
                Ok(AppConfig::default())
            }
            Err(Error::Serialization(e)) => Err(Error::Config(format!(
                "Config file {} is not valid: {}",
                self.path.display(),
                e
            ))),
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, config: &AppConfig) -> Result<()> {
        persist::write_json_atomic(&self.path, config).await
    }
}

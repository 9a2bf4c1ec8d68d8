//! In-memory remote and transcoder shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::remote::{RemoteItem, RemoteSource};
use bridge_traits::time::SystemClock;
use bridge_traits::transcode::{DerivativeProfile, TranscodedImage, Transcoder};
use bytes::Bytes;
use core_runtime::config::{AppConfig, ConfigStore, MirrorConfig};
use core_sync::SyncCoordinator;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Auth,
    Transient,
}

impl Failure {
    fn error(self, what: &str) -> BridgeError {
        match self {
            Failure::Auth => BridgeError::Auth(format!("invalid_grant while {}", what)),
            Failure::Transient => BridgeError::Transient(format!("503 while {}", what)),
        }
    }
}

#[derive(Default)]
pub struct FakeRemote {
    folders: Mutex<HashMap<String, Vec<RemoteItem>>>,
    failing_folders: Mutex<HashMap<String, Failure>>,
    failing_downloads: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<(String, String, usize)>>,
    list_delay: Mutex<Option<Duration>>,
    pub list_calls: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_folder(&self, folder_id: &str, items: Vec<RemoteItem>) {
        self.folders
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), items);
    }

    pub fn fail_folder(&self, folder_id: &str, failure: Failure) {
        self.failing_folders
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), failure);
    }

    pub fn heal_folder(&self, folder_id: &str) {
        self.failing_folders.lock().unwrap().remove(folder_id);
    }

    pub fn fail_download(&self, file_id: &str) {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(file_id.to_string());
    }

    pub fn slow_listing(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn list_children(&self, folder_id: &str) -> BridgeResult<Vec<RemoteItem>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = self.failing_folders.lock().unwrap().get(folder_id) {
            return Err(failure.error("listing"));
        }
        Ok(self
            .folders
            .lock()
            .unwrap()
            .get(folder_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_bytes(&self, file_id: &str) -> BridgeResult<Bytes> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.failing_downloads.lock().unwrap().contains(file_id) {
            return Err(Failure::Transient.error("downloading"));
        }
        Ok(Bytes::from(format!("jpeg:{}", file_id)))
    }

    async fn upload_bytes(
        &self,
        folder_id: &str,
        name: &str,
        _mime_type: &str,
        bytes: Bytes,
    ) -> BridgeResult<String> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((folder_id.to_string(), name.to_string(), bytes.len()));
        Ok(format!("uploaded{}", uploads.len()))
    }
}

/// Records every transcode; output is the input tagged with the profile.
#[derive(Default)]
pub struct CountingTranscoder {
    pub calls: AtomicUsize,
    pub by_profile: Mutex<Vec<(DerivativeProfile, String)>>,
}

impl CountingTranscoder {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for CountingTranscoder {
    async fn transcode(
        &self,
        bytes: Bytes,
        profile: DerivativeProfile,
    ) -> BridgeResult<TranscodedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = String::from_utf8_lossy(&bytes).to_string();
        self.by_profile.lock().unwrap().push((profile, source.clone()));
        Ok(TranscodedImage {
            bytes: Bytes::from(format!("webp[{}]:{}", profile, source)),
            width: 800,
            height: 600,
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: MirrorConfig,
    pub remote: Arc<FakeRemote>,
    pub transcoder: Arc<CountingTranscoder>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    pub async fn new(app: AppConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let config = MirrorConfig::builder()
            .data_dir(dir.path())
            .build()
            .unwrap();
        ConfigStore::new(config.config_file())
            .save(&app)
            .await
            .unwrap();

        let remote = FakeRemote::new();
        let transcoder = Arc::new(CountingTranscoder::default());
        let coordinator = Arc::new(SyncCoordinator::new(
            config.clone(),
            remote.clone(),
            transcoder.clone(),
            Arc::new(SystemClock),
        ));

        Self {
            dir,
            config,
            remote,
            transcoder,
            coordinator,
        }
    }

    pub async fn with_root(root: &str) -> Self {
        Self::new(app_with_root(root)).await
    }

    /// Second coordinator over the same data directory, as another
    /// process would be.
    pub fn sibling(&self) -> SyncCoordinator {
        SyncCoordinator::new(
            self.config.clone(),
            self.remote.clone(),
            self.transcoder.clone(),
            Arc::new(SystemClock),
        )
    }

    pub fn image_files(&self) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(&self.config.images_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    pub async fn app_config(&self) -> AppConfig {
        ConfigStore::new(self.config.config_file())
            .load()
            .await
            .unwrap()
    }
}

pub fn app_with_root(root: &str) -> AppConfig {
    AppConfig {
        root_folder_id: root.to_string(),
        ..AppConfig::default()
    }
}

pub fn image(id: &str, name: &str) -> RemoteItem {
    RemoteItem::file(id, name, "image/jpeg")
}

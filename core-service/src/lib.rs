//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (remote store,
//! transcoder, clock) into the mirror core and exposes the handful of entry
//! points a host needs: manual sync, cache reads, change notifications,
//! status polling, health probes and cover uploads. Desktop hosts
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop` and `provider-google-drive`) and call
//! [`bootstrap_desktop`].

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{remote::RemoteSource, time::Clock, transcode::Transcoder, SystemClock};
use bytes::Bytes;
use core_runtime::config::MirrorConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_sync::{
    CacheStructure, Debouncer, NotificationAck, PublishHook, SyncCoordinator, SyncError,
    SyncTrigger, SystemState, SystemStatus,
};
use tracing::{debug, info, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::{ImageTranscoder, ReqwestHttpClient};
#[cfg(feature = "desktop-shims")]
use provider_google_drive::GoogleDriveConnector;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub remote: Arc<dyn RemoteSource>,
    pub transcoder: Arc<dyn Transcoder>,
    pub clock: Arc<dyn Clock>,
    pub publish_hook: Option<Arc<dyn PublishHook>>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(remote: Arc<dyn RemoteSource>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            remote,
            transcoder,
            clock: Arc::new(SystemClock),
            publish_hook: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_publish_hook(mut self, hook: Arc<dyn PublishHook>) -> Self {
        self.publish_hook = Some(hook);
        self
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct MirrorService {
    coordinator: Arc<SyncCoordinator>,
    debouncer: Arc<Debouncer>,
    events: EventBus,
}

impl MirrorService {
    /// Create a new service from the provided dependencies.
    pub fn new(config: MirrorConfig, deps: CoreDependencies) -> Self {
        let events = EventBus::default();
        let debounce_delay = config.debounce_delay;

        let mut coordinator =
            SyncCoordinator::new(config, deps.remote, deps.transcoder, deps.clock)
                .with_event_bus(events.clone());
        if let Some(hook) = deps.publish_hook {
            coordinator = coordinator.with_publish_hook(hook);
        }
        let coordinator = Arc::new(coordinator);
        let debouncer = Debouncer::new(coordinator.clone(), debounce_delay);

        Self {
            coordinator,
            debouncer,
            events,
        }
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Start a pass in the background.
    ///
    /// Fails immediately with `AlreadyRunning` when a pass is in flight and
    /// with a configuration error when no root folder is set; otherwise
    /// returns as soon as the pass is spawned.
    pub async fn start_sync(&self) -> Result<()> {
        if self.debouncer.is_running() {
            return Err(SyncError::AlreadyRunning {
                since: "a debounced pass".to_string(),
            }
            .into());
        }
        let claim = self.coordinator.try_claim()?;

        let app = self.coordinator.config_store().load().await?;
        if app.root_folder().is_none() {
            return Err(CoreError::Config("No root folder configured".to_string()));
        }

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            match coordinator.run_claimed(claim, SyncTrigger::Manual).await {
                Ok(report) => debug!(pass_id = %report.pass_id, "Manual sync finished"),
                Err(e) => warn!(error = %e, "Manual sync failed"),
            }
        });
        info!("Manual sync started");
        Ok(())
    }

    /// Last good snapshot; may refresh it in the background.
    pub async fn load_cache(&self) -> Option<CacheStructure> {
        self.coordinator.load_cache().await
    }

    /// Entry point for remote change webhooks. Returns immediately.
    pub fn on_change_notification(&self) -> NotificationAck {
        self.debouncer.on_change_notification()
    }

    pub async fn status(&self) -> SystemStatus {
        self.coordinator.status().load().await
    }

    pub async fn check_health(&self) -> Result<SystemState> {
        Ok(self.coordinator.check_health().await?)
    }

    /// Upload an image into the configured cover folder and return a URL
    /// for it. The URL goes through the proxy until the next pass has
    /// produced a local cover derivative.
    pub async fn upload_cover(&self, name: &str, bytes: Bytes, mime_type: &str) -> Result<String> {
        if !mime_type.starts_with("image/") {
            return Err(CoreError::Config(format!(
                "Cover must be an image, got {}",
                mime_type
            )));
        }

        let app = self.coordinator.config_store().load().await?;
        let folder = app
            .covers_folder()
            .ok_or_else(|| CoreError::Config("No cover folder configured".to_string()))?;

        let file_id = self
            .coordinator
            .source()
            .upload_bytes(folder, name, mime_type, bytes)
            .await?;
        info!(file_id = %file_id, name, "Cover uploaded");
        Ok(self.coordinator.proxy_url(&file_id))
    }
}

/// Convenience bootstrapper for desktop hosts: Google Drive over reqwest
/// and the WebP transcoder.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_runtime::config::MirrorConfig;
/// use core_service::bootstrap_desktop;
///
/// let config = MirrorConfig::builder().data_dir("/var/lib/gallery").build()?;
/// let service = bootstrap_desktop(config, "ya29.token".to_string())?;
/// let snapshot = service.load_cache().await;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(config: MirrorConfig, access_token: String) -> Result<MirrorService> {
    let http = ReqwestHttpClient::new()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    let remote = GoogleDriveConnector::new(Arc::new(http), access_token);
    let deps = CoreDependencies::new(Arc::new(remote), Arc::new(ImageTranscoder::new()));
    Ok(MirrorService::new(config, deps))
}

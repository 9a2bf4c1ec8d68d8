//! # Sync Coordinator
//!
//! Drives one end-to-end mirror pass and owns the single-flight guarantees.
//!
//! ## Workflow
//!
//! 1. Load `config.json`; no root folder means the pass is rejected
//! 2. Acquire the in-process flag, then the on-disk [`SyncLock`]
//! 3. Build the album tree from the remote root
//! 4. Materialize a catalog derivative for every photo
//! 5. Materialize cover derivatives for the cover folder, if configured
//! 6. Delete orphaned derivatives (skipped if the valid set is partial)
//! 7. Point proxied config URLs at the new local derivatives
//! 8. Atomically persist `structure.json`
//! 9. Run the publish hook, if any
//! 10. Record the outcome in `status.json`, then release the lock
//!
//! Steps 3 to 9 happen strictly in order. Any failure among them leaves the
//! previously persisted cache untouched.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncCoordinator, SyncTrigger};
//! use std::sync::Arc;
//!
//! let coordinator = Arc::new(SyncCoordinator::new(config, source, transcoder, clock));
//!
//! // Reader path: never blocks on a pass, may start one in the background
//! let snapshot = coordinator.load_cache().await;
//!
//! // Explicit pass
//! let report = coordinator.run_sync(SyncTrigger::Manual).await?;
//! println!("{} photos, {} transcoded", report.photos, report.transcoded);
//! ```

use crate::cache::CacheStore;
use crate::debounce::SyncRunner;
use crate::derivative::{
    DerivativePipeline, DerivativeRequest, DerivativeStore, MaterializeReport,
};
use crate::lock::SyncLock;
use crate::models::{Album, CacheStructure};
use crate::orphans::{CollectionReport, OrphanCollector};
use crate::rewrite;
use crate::status::{StatusStore, SyncState, SystemState, SystemStatus};
use crate::tree::TreeBuilder;
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::remote::{RemoteItem, RemoteSource};
use bridge_traits::time::Clock;
use bridge_traits::transcode::{DerivativeProfile, Transcoder};
use chrono::{DateTime, Utc};
use core_runtime::config::{AppConfig, ConfigStore, MirrorConfig};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent, SystemEvent};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Name given to the root album; the remote root folder's own name is not
/// shown anywhere.
pub const ROOT_ALBUM_NAME: &str = "Catalog";

/// What asked for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Manual,
    /// A reader found the cache older than the auto-sync interval
    StaleCache,
    /// Debounced change notification from the remote
    Notification,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::StaleCache => "stale-cache",
            SyncTrigger::Notification => "notification",
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Downstream step run after the cache is persisted, while the lock is
/// still held (static rebuild, deploy...). It reports its own progress
/// through `status`, typically BUILDING then DEPLOYING.
#[async_trait]
pub trait PublishHook: Send + Sync {
    async fn publish(&self, cache: &CacheStructure, status: &StatusStore) -> Result<()>;
}

/// Summary of a completed pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pass_id: String,
    pub trigger: SyncTrigger,
    pub albums: usize,
    pub photos: usize,
    pub transcoded: usize,
    pub fresh: usize,
    pub failed: usize,
    pub covers: usize,
    pub orphans_removed: usize,
    /// Orphan collection did not run because the cover folder could not be listed
    pub collection_skipped: bool,
    pub config_fields_rewritten: usize,
    pub duration: Duration,
}

/// Claim on the in-process running flag, taken with
/// [`SyncCoordinator::try_claim`]. Dropping it clears the flag however the
/// pass ends.
pub struct PassClaim(Arc<AtomicBool>);

impl Drop for PassClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    config: MirrorConfig,
    source: Arc<dyn RemoteSource>,
    config_store: ConfigStore,
    cache_store: CacheStore,
    status: Arc<StatusStore>,
    lock: SyncLock,
    pipeline: DerivativePipeline,
    collector: OrphanCollector,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    publish_hook: Option<Arc<dyn PublishHook>>,
    in_flight: Arc<AtomicBool>,
}

impl SyncCoordinator {
    pub fn new(
        config: MirrorConfig,
        source: Arc<dyn RemoteSource>,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = DerivativeStore::new(
            &config.images_dir,
            config.public_images_prefix.as_str(),
            transcoder.output_extension(),
        );
        let pipeline = DerivativePipeline::new(
            source.clone(),
            transcoder,
            store.clone(),
            config.max_concurrent_transcodes,
        );

        Self {
            config_store: ConfigStore::new(config.config_file()),
            cache_store: CacheStore::new(config.cache_file()),
            status: Arc::new(StatusStore::new(
                config.status_file(),
                config.status_log_capacity,
                clock.clone(),
            )),
            lock: SyncLock::new(config.lock_file(), config.lock_stale_after, clock.clone()),
            pipeline,
            collector: OrphanCollector::new(store),
            source,
            clock,
            config,
            event_bus: None,
            publish_hook: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_publish_hook(mut self, hook: Arc<dyn PublishHook>) -> Self {
        self.publish_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn cache_store(&self) -> &CacheStore {
        &self.cache_store
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn source(&self) -> &Arc<dyn RemoteSource> {
        &self.source
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A pass started by this process has not finished yet.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// URL serving `file_id` through the proxy endpoint.
    pub fn proxy_url(&self, file_id: &str) -> String {
        format!("{}{}", self.config.proxy_url_prefix, file_id)
    }

    pub(crate) fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.event_bus {
            let description = event.description();
            if bus.emit(event).is_err() {
                debug!(event = %description, "No event subscribers");
            }
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Last good snapshot, returned immediately.
    ///
    /// When auto-sync is enabled and the snapshot is older than the interval
    /// (or missing), a pass is started in the background. The caller never
    /// waits for it and never sees its errors; the next reader gets the
    /// refreshed snapshot.
    pub async fn load_cache(self: &Arc<Self>) -> Option<CacheStructure> {
        let cache = self.cache_store.load_quiet().await;

        if self.should_refresh(cache.as_ref()).await {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                match this.run_sync(SyncTrigger::StaleCache).await {
                    Ok(_) => {}
                    Err(SyncError::AlreadyRunning { .. }) => {
                        debug!("Background refresh skipped, pass already running")
                    }
                    Err(e) => warn!(error = %e, "Background refresh failed"),
                }
            });
        }

        cache
    }

    async fn should_refresh(&self, cache: Option<&CacheStructure>) -> bool {
        if self.is_running() {
            return false;
        }

        let app = match self.config_store.load().await {
            Ok(app) => app,
            Err(e) => {
                warn!(error = %e, "Cannot evaluate cache staleness");
                return false;
            }
        };

        let Some(interval) = app.auto_sync_every() else {
            return false;
        };
        if app.root_folder().is_none() {
            return false;
        }

        match cache {
            None => true,
            Some(cache) => {
                let age = self.clock.now() - cache.last_synced;
                age.to_std().map(|age| age >= interval).unwrap_or(false)
            }
        }
    }

    // ========================================================================
    // Pass
    // ========================================================================

    /// Take the in-process running flag without starting anything. Callers
    /// that spawn the pass claim first so overlapping requests are refused
    /// synchronously.
    pub fn try_claim(&self) -> Result<PassClaim> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| PassClaim(Arc::clone(&self.in_flight)))
            .map_err(|_| SyncError::AlreadyRunning {
                since: "a pass started by this process".to_string(),
            })
    }

    pub async fn run_sync(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        let claim = self.try_claim()?;
        self.run_claimed(claim, trigger).await
    }

    /// Run a pass under a claim from [`SyncCoordinator::try_claim`].
    #[instrument(skip(self, _claim), fields(trigger = %trigger))]
    pub async fn run_claimed(
        &self,
        _claim: PassClaim,
        trigger: SyncTrigger,
    ) -> Result<SyncReport> {
        let app = self.config_store.load().await?;
        let Some(root_folder_id) = app.root_folder().map(str::to_string) else {
            let message = "No root folder configured";
            if let Err(e) = self.status.record_error(message).await {
                warn!(error = %e, "Failed to record rejected sync");
            }
            return Err(SyncError::Config(message.to_string()));
        };

        let guard = self.lock.acquire().await?;
        let pass_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(pass_id = %pass_id, root_folder_id = %root_folder_id, "Sync pass started");

        let result = self
            .execute_pass(&pass_id, trigger, &app, &root_folder_id, started)
            .await;

        // Final status must land while the lock is still ours.
        match &result {
            Ok(report) => self.finish_success(report).await,
            Err(e) => self.finish_failure(&pass_id, e).await,
        }

        if let Err(e) = self.lock.release(guard).await {
            error!(pass_id = %pass_id, error = %e, "Failed to release sync lock");
        }
        result
    }

    async fn execute_pass(
        &self,
        pass_id: &str,
        trigger: SyncTrigger,
        app: &AppConfig,
        root_folder_id: &str,
        started: Instant,
    ) -> Result<SyncReport> {
        self.begin(pass_id, trigger).await?;

        // Tree
        self.phase(pass_id, "tree");
        let mut root = TreeBuilder::new(self.source.clone(), self.config.proxy_url_prefix.as_str())
            .with_photo_order(app.photo_sort_order)
            .with_max_depth(self.config.max_tree_depth)
            .build_tree(root_folder_id, ROOT_ALBUM_NAME)
            .await?;
        let albums = root.total_sub_albums();
        let photos = root.total_photos();
        self.status
            .append_log(&format!("Found {} albums and {} photos", albums, photos))
            .await?;

        // Catalog derivatives
        self.phase(pass_id, "derivatives");
        let catalog = self
            .pipeline
            .materialize_all(catalog_requests(&root), DerivativeProfile::Catalog)
            .await?;
        root.for_each_photo_mut(&mut |photo| {
            if let Some(local_ref) = catalog.refs.get(&photo.id) {
                photo.set_refs(local_ref.as_str());
            }
        });

        let mut valid_keys: HashSet<String> = catalog
            .refs
            .keys()
            .map(|id| DerivativeStore::key(id, DerivativeProfile::Catalog))
            .collect();

        // Cover derivatives
        let (covers, collection_allowed) = self.materialize_covers(app).await?;
        valid_keys.extend(
            covers
                .refs
                .keys()
                .map(|id| DerivativeStore::key(id, DerivativeProfile::Cover)),
        );

        self.status
            .append_log(&format!(
                "Images: {} converted, {} up to date, {} failed ({} kept from earlier passes)",
                catalog.transcoded + covers.transcoded,
                catalog.fresh + covers.fresh,
                catalog.failed + covers.failed,
                catalog.kept_previous + covers.kept_previous
            ))
            .await?;

        // Cleanup
        self.phase(pass_id, "cleanup");
        let orphans = if collection_allowed {
            self.collector.collect(&valid_keys).await?
        } else {
            warn!(pass_id = %pass_id, "Skipping orphan collection, cover set is incomplete");
            CollectionReport::default()
        };

        let config_fields_rewritten = self.migrate_config(&covers, &catalog).await?;

        // Persist
        self.phase(pass_id, "persist");
        let cache = CacheStructure {
            root,
            last_synced: self.clock.now(),
        };
        self.cache_store.save(&cache).await?;

        if let Some(hook) = &self.publish_hook {
            self.phase(pass_id, "publish");
            hook.publish(&cache, &self.status).await?;
        }

        Ok(SyncReport {
            pass_id: pass_id.to_string(),
            trigger,
            albums,
            photos,
            transcoded: catalog.transcoded + covers.transcoded,
            fresh: catalog.fresh + covers.fresh,
            failed: catalog.failed + covers.failed,
            covers: covers.refs.len(),
            orphans_removed: orphans.removed.len(),
            collection_skipped: !collection_allowed,
            config_fields_rewritten,
            duration: started.elapsed(),
        })
    }

    /// Move status to SYNCING. A status still showing an active pass was
    /// left behind by a crash (we hold the lock), so it is closed out first.
    async fn begin(&self, pass_id: &str, trigger: SyncTrigger) -> Result<()> {
        let current = self.status.load().await;
        if current.sync_state.is_active() {
            warn!(state = %current.sync_state, "Previous pass did not finish, marking it failed");
            self.status
                .transition(SyncState::Error, "Previous sync was interrupted")
                .await?;
        }

        self.status
            .transition(
                SyncState::Syncing,
                &format!("Sync started ({})", trigger.as_str()),
            )
            .await?;

        self.emit(CoreEvent::Sync(SyncEvent::Started {
            pass_id: pass_id.to_string(),
            trigger: trigger.as_str().to_string(),
        }));
        Ok(())
    }

    fn phase(&self, pass_id: &str, phase: &str) {
        debug!(pass_id = %pass_id, phase, "Sync phase");
        self.emit(CoreEvent::Sync(SyncEvent::Phase {
            pass_id: pass_id.to_string(),
            phase: phase.to_string(),
        }));
    }

    /// Returns the cover report and whether orphan collection may run.
    async fn materialize_covers(&self, app: &AppConfig) -> Result<(MaterializeReport, bool)> {
        let Some(covers_folder) = app.covers_folder() else {
            return Ok((MaterializeReport::default(), true));
        };

        let items = match self.source.list_children(covers_folder).await {
            Ok(items) => items,
            Err(e) if e.is_auth() => return Err(e.into()),
            Err(e) => {
                warn!(folder_id = %covers_folder, error = %e, "Cannot list cover folder");
                self.status
                    .append_log(&format!("Cover folder unavailable: {}", e))
                    .await?;
                return Ok((MaterializeReport::default(), false));
            }
        };

        let requests = items
            .into_iter()
            .filter(RemoteItem::is_image)
            .map(|item| DerivativeRequest {
                file_id: item.id,
                name: item.name,
                modified_time: item.modified_time,
            })
            .collect();

        let report = self
            .pipeline
            .materialize_all(requests, DerivativeProfile::Cover)
            .await?;
        Ok((report, true))
    }

    /// Re-reads the config so edits made during the pass are not lost.
    async fn migrate_config(
        &self,
        covers: &MaterializeReport,
        catalog: &MaterializeReport,
    ) -> Result<usize> {
        let mut latest = self.config_store.load().await?;
        let changed = rewrite::migrate_config_urls(&mut latest, &covers.refs, &catalog.refs);
        if changed > 0 {
            self.config_store.save(&latest).await?;
            info!(fields = changed, "Config image URLs moved to local derivatives");
        }
        Ok(changed)
    }

    async fn finish_success(&self, report: &SyncReport) {
        let now = self.clock.now();
        let mut previous_state = None;
        let message = format!(
            "Sync complete: {} albums, {} photos",
            report.albums, report.photos
        );

        let outcome = self
            .status
            .transition_with(SyncState::Success, &message, |status| {
                previous_state = Some(status.state);
                status.state = SystemState::Active;
                status.last_sync_time = Some(now);
            })
            .await;

        match outcome {
            Ok(status) => self.emit_state_change(previous_state, &status),
            Err(e) => warn!(error = %e, "Failed to record sync success"),
        }

        info!(
            pass_id = %report.pass_id,
            photos = report.photos,
            transcoded = report.transcoded,
            failed = report.failed,
            orphans_removed = report.orphans_removed,
            duration_ms = report.duration.as_millis() as u64,
            "Sync pass completed"
        );
        self.emit(CoreEvent::Sync(SyncEvent::Completed {
            pass_id: report.pass_id.clone(),
            albums: report.albums as u64,
            photos: report.photos as u64,
            transcoded: report.transcoded as u64,
            failed: report.failed as u64,
            orphans_removed: report.orphans_removed as u64,
            duration_ms: report.duration.as_millis() as u64,
        }));
    }

    async fn finish_failure(&self, pass_id: &str, err: &SyncError) {
        error!(pass_id = %pass_id, error = %err, "Sync pass failed");

        let now = self.clock.now();
        let auth = err.is_auth();
        let message = err.to_string();
        let line = format!("Sync failed: {}", message);
        let mut previous_state = None;

        let transitioned = self
            .status
            .transition_with(SyncState::Error, &line, |status| {
                previous_state = Some(mark_failed(status, &message, now, auth));
            })
            .await;

        let outcome = match transitioned {
            Err(SyncError::InvalidStateTransition { .. }) => {
                // Failed before SYNCING was recorded; keep the pass state.
                self.status
                    .update(|status| {
                        previous_state = Some(mark_failed(status, &message, now, auth));
                    })
                    .await
            }
            other => other,
        };

        match outcome {
            Ok(status) => self.emit_state_change(previous_state, &status),
            Err(e) => warn!(error = %e, "Failed to record sync failure"),
        }

        self.emit(CoreEvent::Sync(SyncEvent::Failed {
            pass_id: pass_id.to_string(),
            message,
            recoverable: err.is_retryable(),
        }));
    }

    pub(crate) fn emit_state_change(&self, previous: Option<SystemState>, status: &SystemStatus) {
        if let Some(from) = previous.filter(|from| *from != status.state) {
            info!(from = %from, to = %status.state, "System state changed");
            self.emit(CoreEvent::System(SystemEvent::StateChanged {
                from: from.as_str().to_string(),
                to: status.state.as_str().to_string(),
            }));
        }
    }
}

#[async_trait]
impl SyncRunner for SyncCoordinator {
    async fn run(&self) -> Result<()> {
        self.run_sync(SyncTrigger::Notification).await.map(|_| ())
    }
}

/// One request per distinct photo id; a file linked into several folders
/// must not be written by two jobs at once.
fn catalog_requests(root: &Album) -> Vec<DerivativeRequest> {
    let mut unique = BTreeMap::new();
    root.for_each_photo(&mut |photo| {
        unique.entry(photo.id.as_str()).or_insert_with(|| DerivativeRequest {
            file_id: photo.id.clone(),
            name: photo.name.clone(),
            modified_time: photo.modified_time,
        });
    });
    unique.into_values().collect()
}

/// Returns the system state before the change.
fn mark_failed(
    status: &mut SystemStatus,
    message: &str,
    at: DateTime<Utc>,
    auth: bool,
) -> SystemState {
    let previous = status.state;
    status.last_error = Some(message.to_string());
    status.last_error_time = Some(at);
    if auth {
        status.state = SystemState::Maintenance;
    }
    previous
}

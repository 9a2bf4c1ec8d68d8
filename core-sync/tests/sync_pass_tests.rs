//! End-to-end tests of sync passes against an in-memory remote.
//!
//! These verify:
//! - Idempotent re-runs and incremental regeneration
//! - Orphan collection and the cover set
//! - Cache atomicity on failed passes
//! - Single-flight locking and stale lock recovery
//! - Status and system state bookkeeping

mod common;

use async_trait::async_trait;
use bridge_traits::remote::RemoteItem;
use chrono::{Duration as ChronoDuration, Utc};
use common::{app_with_root, image, Failure, Harness};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    CacheStructure, PublishHook, StatusStore, SyncCoordinator, SyncError, SyncState, SyncTrigger,
    SystemState,
};
use std::sync::Arc;
use std::time::Duration;

fn vacation_harness_items(b_modified: chrono::DateTime<Utc>) -> Vec<RemoteItem> {
    let day_one = Utc::now() - ChronoDuration::days(30);
    vec![
        image("a", "a.jpg").with_modified_time(day_one),
        image("b", "b.jpg").with_modified_time(b_modified),
    ]
}

#[tokio::test]
async fn test_vacation_scenario_regenerates_only_changed_photo() {
    let h = Harness::with_root("root").await;
    h.remote
        .set_folder("root", vec![RemoteItem::folder("vac", "Vacation 2024")]);
    let day_five = Utc::now() - ChronoDuration::days(26);
    h.remote.set_folder("vac", vacation_harness_items(day_five));

    let before = Utc::now();
    let first = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(first.albums, 1);
    assert_eq!(first.photos, 2);
    assert_eq!(first.transcoded, 2);

    let cache = h.coordinator.cache_store().load().await.unwrap().unwrap();
    assert!(cache.last_synced >= before);
    let vacation = &cache.root.sub_albums[0];
    assert_eq!(vacation.name, "Vacation 2024");
    let names: Vec<_> = vacation.photos.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg"]);
    assert_eq!(vacation.photos[0].thumbnail_ref, "/images/a.webp");
    assert_eq!(cache.root.cover_id.as_deref(), Some("a"));
    assert_eq!(h.image_files(), vec!["a.webp", "b.webp"]);

    // b.jpg re-uploaded after the first pass wrote its derivative
    h.remote
        .set_folder("vac", vacation_harness_items(Utc::now() + ChronoDuration::hours(1)));
    let second = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    assert_eq!(second.transcoded, 1);
    assert_eq!(second.fresh, 1);
    assert_eq!(second.orphans_removed, 0);
    let sources: Vec<_> = h
        .transcoder
        .by_profile
        .lock()
        .unwrap()
        .iter()
        .map(|(_, source)| source.clone())
        .collect();
    assert_eq!(sources.last().map(String::as_str), Some("jpeg:b"));
    assert_eq!(h.image_files(), vec!["a.webp", "b.webp"]);
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder(
        "root",
        vec![
            image("p10", "img10.jpg"),
            image("p2", "img2.jpg"),
            image("p1", "img1.jpg"),
            RemoteItem::folder("f", "Family"),
        ],
    );
    h.remote.set_folder("f", vec![image("q", "q.png")]);

    h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    let first = h.coordinator.cache_store().load().await.unwrap().unwrap();
    let transcodes = h.transcoder.count();

    let report = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    let second = h.coordinator.cache_store().load().await.unwrap().unwrap();

    assert_eq!(report.transcoded, 0);
    assert_eq!(h.transcoder.count(), transcodes);
    assert_eq!(first.root, second.root);
    assert!(second.last_synced >= first.last_synced);

    let names: Vec<_> = second.root.photos.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["img1.jpg", "img2.jpg", "img10.jpg"]);
}

#[tokio::test]
async fn test_removed_photos_are_collected_and_covers_kept() {
    let mut app = app_with_root("root");
    app.covers_folder_id = Some("covers".to_string());
    let h = Harness::new(app).await;

    h.remote
        .set_folder("root", vec![image("keep", "keep.jpg"), image("drop", "drop.jpg")]);
    h.remote.set_folder(
        "covers",
        vec![image("c1", "cover.jpg"), RemoteItem::file("t", "notes.txt", "text/plain")],
    );

    h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(
        h.image_files(),
        vec!["c1.cover.webp", "drop.webp", "keep.webp"]
    );

    h.remote.set_folder("root", vec![image("keep", "keep.jpg")]);
    let report = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    assert_eq!(report.orphans_removed, 1);
    assert_eq!(report.covers, 1);
    assert_eq!(h.image_files(), vec!["c1.cover.webp", "keep.webp"]);

    // Every file on disk is referenced by the tree or the cover set
    let cache = h.coordinator.cache_store().load().await.unwrap().unwrap();
    assert_eq!(cache.root.photos.len(), 1);
    assert_eq!(cache.root.photos[0].full_ref, "/images/keep.webp");
}

#[tokio::test]
async fn test_failed_download_falls_back_to_proxy() {
    let h = Harness::with_root("root").await;
    h.remote
        .set_folder("root", vec![image("ok", "ok.jpg"), image("broken", "broken.jpg")]);
    h.remote.fail_download("broken");

    let report = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.failed, 1);

    let cache = h.coordinator.cache_store().load().await.unwrap().unwrap();
    let broken = cache.root.photos.iter().find(|p| p.id == "broken").unwrap();
    assert_eq!(broken.thumbnail_ref, "/api/image?id=broken");
    assert_eq!(h.image_files(), vec!["ok.webp"]);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_derivative() {
    let h = Harness::with_root("root").await;
    let day_one = Utc::now() - ChronoDuration::days(30);
    h.remote
        .set_folder("root", vec![image("x", "x.jpg").with_modified_time(day_one)]);
    h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(h.image_files(), vec!["x.webp"]);

    // Remote copy replaced, but the new original cannot be fetched
    h.remote.set_folder(
        "root",
        vec![image("x", "x.jpg").with_modified_time(Utc::now() + ChronoDuration::hours(1))],
    );
    h.remote.fail_download("x");
    let report = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(h.image_files(), vec!["x.webp"]);
    let cache = h.coordinator.cache_store().load().await.unwrap().unwrap();
    assert_eq!(cache.root.photos[0].thumbnail_ref, "/images/x.webp");
}

#[tokio::test]
async fn test_cache_write_failure_fails_pass() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);

    tokio::fs::create_dir_all(&h.config.images_dir).await.unwrap();
    tokio::fs::write(h.config.images_dir.join("stray.webp"), b"old")
        .await
        .unwrap();
    // A directory where structure.json belongs cannot be renamed over
    let cache_path = h.coordinator.cache_store().path().to_path_buf();
    tokio::fs::create_dir_all(&cache_path).await.unwrap();
    tokio::fs::write(cache_path.join("keep"), b"untouched")
        .await
        .unwrap();

    let err = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::LocalIo(_)));

    assert!(cache_path.is_dir());
    assert_eq!(tokio::fs::read(cache_path.join("keep")).await.unwrap(), b"untouched");
    // Cleanup ran before the persist step
    assert_eq!(h.image_files(), vec!["x.webp"]);
    assert!(!h.config.lock_file().exists());
    assert!(!h.coordinator.is_running());

    let status = h.coordinator.status().load().await;
    assert_eq!(status.sync_state, SyncState::Error);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_failed_pass_leaves_previous_cache_intact() {
    let h = Harness::with_root("root").await;
    h.remote
        .set_folder("root", vec![RemoteItem::folder("sub", "Sub"), image("x", "x.jpg")]);
    h.remote.set_folder("sub", vec![image("y", "y.jpg")]);
    h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    let cache_path = h.coordinator.cache_store().path().to_path_buf();
    let snapshot = tokio::fs::read(&cache_path).await.unwrap();

    h.remote.fail_folder("sub", Failure::Transient);
    let err = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Transient(_)));

    assert_eq!(tokio::fs::read(&cache_path).await.unwrap(), snapshot);
    assert!(serde_json::from_slice::<CacheStructure>(&snapshot).is_ok());
    // Nothing was collected from a partial tree
    assert_eq!(h.image_files(), vec!["x.webp", "y.webp"]);
    assert!(!h.config.lock_file().exists());

    let status = h.coordinator.status().load().await;
    assert_eq!(status.sync_state, SyncState::Error);
    assert_eq!(status.state, SystemState::Active);
    assert!(status.last_error.unwrap().contains("503"));
    assert!(!h.coordinator.is_running());
}

#[tokio::test]
async fn test_concurrent_passes_run_once() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);
    h.remote.slow_listing(Duration::from_millis(200));

    let (first, second) = tokio::join!(
        h.coordinator.run_sync(SyncTrigger::Manual),
        h.coordinator.run_sync(SyncTrigger::Notification),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(SyncError::AlreadyRunning { .. }))));

    // A second process sees the on-disk lock
    let other = h.sibling();
    let (mine, theirs) = tokio::join!(
        h.coordinator.run_sync(SyncTrigger::Manual),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            other.run_sync(SyncTrigger::StaleCache).await
        }
    );
    assert!(mine.is_ok());
    assert!(matches!(theirs, Err(SyncError::AlreadyRunning { .. })));
    assert_eq!(h.transcoder.count(), 1);
}

#[tokio::test]
async fn test_outcome_is_recorded_before_lock_release() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();
    let coordinator = h.sibling().with_event_bus(bus);

    // Runs on the same thread as the pass, so the disk is inspected before
    // the pass is polled again after announcing completion.
    let observe = async {
        loop {
            match events.recv().await {
                Ok(CoreEvent::Sync(SyncEvent::Completed { .. })) => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended early: {}", e),
            }
        }
        let status: serde_json::Value =
            serde_json::from_slice(&std::fs::read(h.config.status_file()).unwrap()).unwrap();
        (h.config.lock_file().exists(), status["syncState"].clone())
    };

    let (result, (lock_held, sync_state)) =
        tokio::join!(coordinator.run_sync(SyncTrigger::Manual), observe);
    result.unwrap();
    assert!(lock_held);
    assert_eq!(sync_state, "SUCCESS");
    assert!(!h.config.lock_file().exists());
}

#[tokio::test]
async fn test_stale_lock_is_reclaimed() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);

    let fresh = serde_json::json!({
        "owner": "crashed-worker",
        "pid": 1,
        "acquiredAt": Utc::now() - ChronoDuration::minutes(5),
    });
    tokio::fs::write(h.config.lock_file(), fresh.to_string())
        .await
        .unwrap();
    let err = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning { .. }));

    let stale = serde_json::json!({
        "owner": "crashed-worker",
        "pid": 1,
        "acquiredAt": Utc::now() - ChronoDuration::minutes(45),
    });
    tokio::fs::write(h.config.lock_file(), stale.to_string())
        .await
        .unwrap();
    h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert!(!h.config.lock_file().exists());
}

#[tokio::test]
async fn test_interrupted_status_is_closed_out() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);
    h.coordinator
        .status()
        .transition(SyncState::Syncing, "Sync started (manual)")
        .await
        .unwrap();

    h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    let status = h.coordinator.status().load().await;
    assert_eq!(status.sync_state, SyncState::Success);
    assert!(status
        .sync_log
        .iter()
        .any(|line| line.ends_with("Previous sync was interrupted")));
}

#[tokio::test]
async fn test_auth_failure_enters_maintenance() {
    let h = Harness::with_root("root").await;
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();
    let coordinator = h.sibling().with_event_bus(bus);

    h.remote.fail_folder("root", Failure::Auth);
    let err = coordinator.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(err.is_auth());

    let status = coordinator.status().load().await;
    assert_eq!(status.state, SystemState::Maintenance);
    assert_eq!(status.sync_state, SyncState::Error);
    assert!(status.last_error_time.is_some());

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::Failed { recoverable, .. }) = event {
            assert!(!recoverable);
            saw_failed = true;
        }
    }
    assert!(saw_failed);

    // Credentials fixed: next pass brings the system back
    h.remote.heal_folder("root");
    coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    let status = coordinator.status().load().await;
    assert_eq!(status.state, SystemState::Active);
    assert_eq!(status.sync_state, SyncState::Success);
    assert!(status.last_sync_time.is_some());
}

#[tokio::test]
async fn test_missing_root_is_a_config_error() {
    let h = Harness::with_root("  ").await;
    let err = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));

    let status = h.coordinator.status().load().await;
    assert_eq!(status.sync_state, SyncState::Idle);
    assert_eq!(status.last_error.as_deref(), Some("No root folder configured"));
    assert_eq!(h.remote.list_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_config_urls_move_to_local_derivatives() {
    let mut app = app_with_root("root");
    app.covers_folder_id = Some("covers".to_string());
    app.background_image = Some("/api/image?id=c1".to_string());
    app.og_image = Some("/api/image?id=p1".to_string());
    app.folder_covers
        .insert("root".to_string(), "/api/image?id=gone".to_string());
    app.extra
        .insert("primaryColor".to_string(), serde_json::json!("#123456"));
    let h = Harness::new(app).await;

    h.remote.set_folder("root", vec![image("p1", "p1.jpg")]);
    h.remote.set_folder("covers", vec![image("c1", "c1.jpg")]);

    let report = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.config_fields_rewritten, 2);

    let app = h.app_config().await;
    assert_eq!(app.background_image.as_deref(), Some("/images/c1.cover.webp"));
    assert_eq!(app.og_image.as_deref(), Some("/images/p1.webp"));
    assert_eq!(app.folder_covers["root"], "/api/image?id=gone");
    assert_eq!(app.extra["primaryColor"], "#123456");
}

#[tokio::test]
async fn test_cover_folder_failure_skips_collection() {
    let mut app = app_with_root("root");
    app.covers_folder_id = Some("covers".to_string());
    let h = Harness::new(app).await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);
    h.remote.fail_folder("covers", Failure::Transient);

    tokio::fs::create_dir_all(&h.config.images_dir).await.unwrap();
    tokio::fs::write(h.config.images_dir.join("old.cover.webp"), b"cover")
        .await
        .unwrap();

    let report = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert!(report.collection_skipped);
    assert_eq!(h.image_files(), vec!["old.cover.webp", "x.webp"]);

    h.remote.fail_folder("covers", Failure::Auth);
    let err = h.coordinator.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(err.is_auth());
}

struct StagedPublish {
    fail: bool,
}

#[async_trait]
impl PublishHook for StagedPublish {
    async fn publish(
        &self,
        cache: &CacheStructure,
        status: &StatusStore,
    ) -> core_sync::Result<()> {
        let line = format!("Building {} photos", cache.root.total_photos());
        status.transition(SyncState::Building, &line).await?;
        status.transition(SyncState::Deploying, "Deploying").await?;
        if self.fail {
            return Err(SyncError::Provider("deploy rejected".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_publish_hook_reports_progress() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);

    let ok = h.sibling().with_publish_hook(Arc::new(StagedPublish { fail: false }));
    ok.run_sync(SyncTrigger::Manual).await.unwrap();
    let status = ok.status().load().await;
    assert_eq!(status.sync_state, SyncState::Success);
    assert!(status.sync_log.iter().any(|l| l.ends_with("Building 1 photos")));

    let failing: SyncCoordinator =
        h.sibling().with_publish_hook(Arc::new(StagedPublish { fail: true }));
    let err = failing.run_sync(SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Provider(_)));
    assert_eq!(failing.status().load().await.sync_state, SyncState::Error);
    // The cache was persisted before the hook ran
    assert!(failing.cache_store().load().await.unwrap().is_some());
}

#[tokio::test]
async fn test_stale_cache_read_refreshes_in_background() {
    let mut app = app_with_root("root");
    app.auto_sync_interval = Some(1);
    let h = Harness::new(app).await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);

    assert!(h.coordinator.load_cache().await.is_none());

    let mut refreshed = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !h.coordinator.is_running() {
            refreshed = h.coordinator.cache_store().load().await.unwrap();
            if refreshed.is_some() {
                break;
            }
        }
    }
    let refreshed = refreshed.expect("background pass should persist a cache");
    assert_eq!(refreshed.root.photos.len(), 1);

    // Fresh cache: served without another pass
    let listings = h.remote.list_calls.load(std::sync::atomic::Ordering::SeqCst);
    let served = h.coordinator.load_cache().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(served.root, refreshed.root);
    assert_eq!(
        h.remote.list_calls.load(std::sync::atomic::Ordering::SeqCst),
        listings
    );
}

#[tokio::test]
async fn test_health_check_tracks_remote() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![]);

    assert_eq!(h.coordinator.check_health().await.unwrap(), SystemState::Active);

    h.remote.fail_folder("root", Failure::Transient);
    assert_eq!(h.coordinator.check_health().await.unwrap(), SystemState::Active);

    h.remote.fail_folder("root", Failure::Auth);
    assert_eq!(
        h.coordinator.check_health().await.unwrap(),
        SystemState::Maintenance
    );
    assert!(h.coordinator.status().load().await.last_checked.is_some());

    let unconfigured = Harness::with_root("").await;
    assert_eq!(
        unconfigured.coordinator.check_health().await.unwrap(),
        SystemState::Setup
    );
}

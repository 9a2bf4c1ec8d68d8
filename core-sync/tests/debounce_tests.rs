//! Debouncer driving a real coordinator.

mod common;

use common::{image, Harness};
use core_sync::{Debouncer, NotificationAck};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

async fn wait_idle(debouncer: &Debouncer) {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !debouncer.is_running() && !debouncer.has_pending_timer() {
            return;
        }
    }
    panic!("debouncer never settled");
}

#[tokio::test]
async fn test_notification_storm_runs_one_pass_plus_one_trailing() {
    let h = Harness::with_root("root").await;
    h.remote.set_folder("root", vec![image("x", "x.jpg")]);
    h.remote.slow_listing(Duration::from_millis(150));

    let debouncer = Debouncer::new(h.coordinator.clone(), Duration::from_millis(50));

    let started = Instant::now();
    for _ in 0..10 {
        assert_eq!(debouncer.on_change_notification(), NotificationAck::Scheduled);
    }
    // Acknowledged without waiting for the delay or the pass
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(h.remote.list_calls.load(Ordering::SeqCst), 0);

    // Let the timer fire and the pass get going
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(debouncer.is_running());
    for _ in 0..5 {
        assert_eq!(debouncer.on_change_notification(), NotificationAck::Queued);
    }

    wait_idle(&debouncer).await;

    // One root listing per pass: the first plus exactly one trailing pass
    assert_eq!(h.remote.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.transcoder.count(), 1);
    assert!(h.coordinator.cache_store().load().await.unwrap().is_some());
}

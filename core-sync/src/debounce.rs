//! # Change-Notification Debouncer
//!
//! Coalesces bursts of remote change notifications into single passes.
//!
//! - While idle, each notification (re)starts a fixed-delay timer; only the
//!   last timer of a burst fires.
//! - While a pass is running, notifications only set `queued_rerun`. When
//!   the pass ends, one trailing pass runs if the flag was set, however
//!   many notifications arrived.
//! - A pass refused with `AlreadyRunning` (another trigger holds the lock)
//!   re-arms the timer instead of dropping the change.
//!
//! [`Debouncer::on_change_notification`] never awaits anything, so the
//! notifier is acknowledged immediately.

use crate::{Result, SyncError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The pass a debouncer invokes.
#[async_trait]
pub trait SyncRunner: Send + Sync + 'static {
    async fn run(&self) -> Result<()>;
}

/// How a notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAck {
    /// Timer (re)started
    Scheduled,
    /// A pass is running; one trailing pass will follow it
    Queued,
}

#[derive(Debug, Default)]
struct DebounceState {
    pending_timer: Option<JoinHandle<()>>,
    /// Bumped on every reschedule so a superseded timer that already
    /// woke up does nothing.
    generation: u64,
    is_running: bool,
    queued_rerun: bool,
}

pub struct Debouncer {
    runner: Arc<dyn SyncRunner>,
    delay: Duration,
    state: Mutex<DebounceState>,
}

impl Debouncer {
    pub fn new(runner: Arc<dyn SyncRunner>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            runner,
            delay,
            state: Mutex::new(DebounceState::default()),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn state(&self) -> MutexGuard<'_, DebounceState> {
        // State stays consistent even if a holder panicked; every critical
        // section is a handful of field writes.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running
    }

    pub fn has_pending_timer(&self) -> bool {
        self.state().pending_timer.is_some()
    }

    /// Must be called from within a Tokio runtime.
    pub fn on_change_notification(self: &Arc<Self>) -> NotificationAck {
        let mut state = self.state();
        if state.is_running {
            state.queued_rerun = true;
            debug!("Pass running, queued a trailing rerun");
            return NotificationAck::Queued;
        }

        self.schedule(&mut state);
        NotificationAck::Scheduled
    }

    fn schedule(self: &Arc<Self>, state: &mut DebounceState) {
        if let Some(timer) = state.pending_timer.take() {
            timer.abort();
        }
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;

        let this = Arc::clone(self);
        state.pending_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            this.fire(generation);
        }));
        debug!(delay_ms = self.delay.as_millis() as u64, "Debounce timer armed");
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        state.pending_timer = None;

        if state.is_running {
            state.queued_rerun = true;
            return;
        }
        state.is_running = true;
        drop(state);

        // Separate task: aborting a later timer must never cancel a pass.
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await });
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            info!("Debounced sync starting");
            let result = self.runner.run().await;

            let mut state = self.state();
            match result {
                Ok(()) => {}
                Err(SyncError::AlreadyRunning { since }) => {
                    info!(since = %since, "Another pass holds the lock, re-arming debounce timer");
                    state.is_running = false;
                    state.queued_rerun = false;
                    self.schedule(&mut state);
                    return;
                }
                Err(e) => warn!(error = %e, "Debounced sync failed"),
            }

            if state.queued_rerun {
                state.queued_rerun = false;
                debug!("Running queued trailing pass");
                continue;
            }

            state.is_running = false;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        runs: AtomicUsize,
        pass_time: Duration,
    }

    #[async_trait]
    impl SyncRunner for CountingRunner {
        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.pass_time).await;
            Ok(())
        }
    }

    fn runner(pass_time: Duration) -> Arc<CountingRunner> {
        Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            pass_time,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_pass() {
        let runner = runner(Duration::from_millis(10));
        let debouncer = Debouncer::new(runner.clone(), Duration::from_secs(10));

        for _ in 0..5 {
            assert_eq!(debouncer.on_change_notification(), NotificationAck::Scheduled);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_running());
        assert!(!debouncer.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_during_pass_give_one_trailing_pass() {
        let runner = runner(Duration::from_secs(60));
        let debouncer = Debouncer::new(runner.clone(), Duration::from_secs(10));

        debouncer.on_change_notification();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(debouncer.is_running());

        for _ in 0..7 {
            assert_eq!(debouncer.on_change_notification(), NotificationAck::Queued);
        }

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
        assert!(!debouncer.is_running());
    }

    struct BusyOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SyncRunner for BusyOnce {
        async fn run(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SyncError::AlreadyRunning {
                    since: "manual pass".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_running_rearms_timer() {
        let runner = Arc::new(BusyOnce {
            calls: AtomicUsize::new(0),
        });
        let debouncer = Debouncer::new(runner.clone(), Duration::from_secs(10));

        debouncer.on_change_notification();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert!(debouncer.has_pending_timer());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
        assert!(!debouncer.has_pending_timer());
    }
}

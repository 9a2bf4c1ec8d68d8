//! # Event Bus
//!
//! In-process broadcast of mirror lifecycle events on top of
//! `tokio::sync::broadcast`, so a host can push progress to a UI without
//! polling the status file.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Started {
//!     pass_id: "p1".to_string(),
//!     trigger: "manual".to_string(),
//! }))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Sync started");
//! # }
//! ```
//!
//! Emitting with no subscribers returns `Err(SendError)`; publishers treat
//! that as "nobody is listening" and carry on.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    System(SystemEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &'static str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::System(e) => e.description(),
        }
    }
}

/// Progress of a single sync pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started {
        pass_id: String,
        /// What asked for the pass: manual, stale-cache, notification
        trigger: String,
    },
    /// The pass moved to a new phase (tree, derivatives, cleanup, persist).
    Phase { pass_id: String, phase: String },
    Completed {
        pass_id: String,
        albums: u64,
        photos: u64,
        transcoded: u64,
        failed: u64,
        orphans_removed: u64,
        duration_ms: u64,
    },
    Failed {
        pass_id: String,
        message: String,
        /// False when operator action is needed (credentials, config)
        recoverable: bool,
    },
}

impl SyncEvent {
    pub fn description(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Phase { .. } => "Sync phase changed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
        }
    }
}

/// Changes to the overall system state (setup / maintenance / active).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SystemEvent {
    StateChanged { from: String, to: String },
}

impl SystemEvent {
    pub fn description(&self) -> &'static str {
        match self {
            SystemEvent::StateChanged { .. } => "System state changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber backlog before `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

//! # Sync Module
//!
//! Mirrors a remote folder tree of photos into a local album cache.
//!
//! ## Overview
//!
//! A pass lists the remote tree, keeps one web-optimised derivative per
//! photo on disk, deletes derivatives nothing references any more and
//! atomically publishes `structure.json` for the serving layer.
//!
//! ## Components
//!
//! - **Tree Builder** (`tree`): Depth-first walk into a sorted album tree
//! - **Derivative Pipeline** (`derivative`): Freshness check, download, transcode, atomic write
//! - **Orphan Collector** (`orphans`): Garbage collection of unreferenced derivatives
//! - **Sync Lock** (`lock`): On-disk single-flight marker with stale reclaim
//! - **Status** (`status`): Pass state machine and capped log in `status.json`
//! - **Sync Coordinator** (`coordinator`): Runs passes, stale-while-revalidate reads, health probe
//! - **Debouncer** (`debounce`): Coalesces remote change notifications

pub mod cache;
pub mod coordinator;
pub mod debounce;
pub mod derivative;
pub mod error;
pub mod health;
pub mod lock;
pub mod models;
pub mod orphans;
pub mod rewrite;
pub mod status;
pub mod tree;

pub use cache::CacheStore;
pub use coordinator::{
    PassClaim, PublishHook, SyncCoordinator, SyncReport, SyncTrigger, ROOT_ALBUM_NAME,
};
pub use debounce::{Debouncer, NotificationAck, SyncRunner};
pub use derivative::{DerivativePipeline, DerivativeRequest, DerivativeStore, MaterializeReport};
pub use error::{Result, SyncError};
pub use lock::{LockGuard, SyncLock};
pub use models::{Album, CacheStructure, PhotoItem};
pub use orphans::{CollectionReport, OrphanCollector};
pub use status::{StatusStore, SyncState, SystemState, SystemStatus};
pub use tree::{natural_cmp, TreeBuilder};

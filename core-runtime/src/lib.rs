//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the mirror crates:
//! - Logging and tracing bootstrap
//! - Configuration (process-level and the persisted `config.json`)
//! - Crash-safe file persistence
//! - Event bus
//!
//! ## Overview
//!
//! Nothing in here knows about albums or derivatives. `core-sync` builds on
//! these pieces; hosts use them directly to bootstrap logging and load
//! configuration before constructing the service.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod persist;

pub use error::{Error, Result};

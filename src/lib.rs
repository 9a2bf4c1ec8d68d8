//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `drive-mirror-workspace`
//! and enable `desktop-shims` to get the reqwest/Google Drive/WebP adapters
//! wired into [`core_service::MirrorService`] without listing each crate.

#[cfg(any(feature = "core", feature = "desktop-shims"))]
pub use core_service;

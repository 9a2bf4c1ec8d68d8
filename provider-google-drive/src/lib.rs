//! # Google Drive Provider
//!
//! Implements the `RemoteSource` bridge for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - Paginated folder listing (`'<id>' in parents and trashed = false`)
//! - Image metadata (dimensions, capture time) on every listed file
//! - Whole-file downloads via `alt=media`
//! - Multipart uploads into a folder
//! - Error classification: rejected credentials surface as
//!   `BridgeError::Auth`, rate limits and 5xx as `BridgeError::Transient`

pub mod connector;
pub mod error;
pub mod types;

pub use connector::GoogleDriveConnector;
pub use error::{GoogleDriveError, Result};

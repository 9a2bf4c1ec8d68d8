//! Remote Source Abstraction
//!
//! The hierarchical file store being mirrored (Google Drive on desktop).
//! Only three capabilities are needed: listing a folder, downloading a
//! file and uploading a file.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// MIME type Google-style stores use for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// A single child of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    /// Capture time when the provider exposes it, else creation time.
    pub created_time: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RemoteItem {
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_folder: true,
            mime_type: FOLDER_MIME_TYPE.to_string(),
            modified_time: None,
            created_time: None,
            width: None,
            height: None,
        }
    }

    pub fn file(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_folder: false,
            mime_type: mime_type.into(),
            modified_time: None,
            created_time: None,
            width: None,
            height: None,
        }
    }

    pub fn with_modified_time(mut self, modified: DateTime<Utc>) -> Self {
        self.modified_time = Some(modified);
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn is_image(&self) -> bool {
        !self.is_folder && self.mime_type.starts_with("image/")
    }
}

/// Remote hierarchical store.
///
/// Implementations must report rejected credentials as
/// [`BridgeError::Auth`](crate::BridgeError::Auth) and network or rate-limit
/// failures as [`BridgeError::Transient`](crate::BridgeError::Transient) so the
/// sync engine can classify the outcome of a pass.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// All direct, non-trashed children of `folder_id`, across every page.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteItem>>;

    async fn download_bytes(&self, file_id: &str) -> Result<Bytes>;

    /// Upload `bytes` as a new file inside `folder_id`, returning its id.
    async fn upload_bytes(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        bytes: Bytes,
    ) -> Result<String>;
}

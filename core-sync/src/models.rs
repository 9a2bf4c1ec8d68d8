//! Album tree data model.
//!
//! This is the shape of `structure.json`, the only artifact the serving
//! layer reads. Field names follow the gallery frontend (`thumbnailLink`,
//! `subAlbums`, `lastSynced`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoItem {
    /// Stable remote file id
    pub id: String,

    pub name: String,

    /// Local derivative URL, or the proxy URL when no derivative exists
    #[serde(rename = "thumbnailLink", alias = "thumbnailRef")]
    pub thumbnail_ref: String,

    #[serde(rename = "fullLink", alias = "fullRef")]
    pub full_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,

    /// Remote modification time, kept for the freshness check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
}

impl PhotoItem {
    /// Point both references at the same URL.
    pub fn set_refs(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.thumbnail_ref = url.clone();
        self.full_ref = url;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub photos: Vec<PhotoItem>,

    #[serde(default)]
    pub sub_albums: Vec<Album>,

    /// First photo, else the cover of the first sub-album that has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_id: Option<String>,
}

impl Album {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            photos: Vec::new(),
            sub_albums: Vec::new(),
            cover_id: None,
        }
    }

    /// Depth-first visit of every photo in this album and below.
    pub fn for_each_photo<'a>(&'a self, f: &mut impl FnMut(&'a PhotoItem)) {
        for photo in &self.photos {
            f(photo);
        }
        for sub in &self.sub_albums {
            sub.for_each_photo(f);
        }
    }

    pub fn for_each_photo_mut(&mut self, f: &mut impl FnMut(&mut PhotoItem)) {
        for photo in &mut self.photos {
            f(photo);
        }
        for sub in &mut self.sub_albums {
            sub.for_each_photo_mut(f);
        }
    }

    pub fn total_photos(&self) -> usize {
        self.photos.len() + self.sub_albums.iter().map(Album::total_photos).sum::<usize>()
    }

    /// Albums below this one, not counting itself.
    pub fn total_sub_albums(&self) -> usize {
        self.sub_albums.len()
            + self
                .sub_albums
                .iter()
                .map(Album::total_sub_albums)
                .sum::<usize>()
    }

    pub fn find_album(&self, id: &str) -> Option<&Album> {
        if self.id == id {
            return Some(self);
        }
        self.sub_albums.iter().find_map(|sub| sub.find_album(id))
    }
}

/// Persisted result of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStructure {
    pub root: Album,
    pub last_synced: DateTime<Utc>,
}

//! # Tree Builder
//!
//! Walks the remote folder graph depth-first into an [`Album`] tree.
//!
//! Folders become sub-albums, `image/*` files become photos, anything else
//! is ignored. Photos start out pointing at the proxy URL; the coordinator
//! swaps in local derivative URLs once they exist.
//!
//! The build is all-or-nothing: any listing error aborts it, so a half-built
//! tree can never reach the cache file. The remote graph is trusted to be a
//! tree, but a folder seen twice is skipped and nesting is capped at
//! `max_depth`.

use crate::models::{Album, PhotoItem};
use crate::{Result, SyncError};
use bridge_traits::remote::{RemoteItem, RemoteSource};
use core_runtime::config::SortOrder;
use futures::future::BoxFuture;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct TreeBuilder {
    source: Arc<dyn RemoteSource>,
    proxy_url_prefix: String,
    photo_order: SortOrder,
    max_depth: usize,
}

impl TreeBuilder {
    pub fn new(source: Arc<dyn RemoteSource>, proxy_url_prefix: impl Into<String>) -> Self {
        Self {
            source,
            proxy_url_prefix: proxy_url_prefix.into(),
            photo_order: SortOrder::Asc,
            max_depth: 64,
        }
    }

    pub fn with_photo_order(mut self, order: SortOrder) -> Self {
        self.photo_order = order;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// URL serving the original through the proxy endpoint.
    pub fn proxy_url(&self, file_id: &str) -> String {
        format!("{}{}", self.proxy_url_prefix, file_id)
    }

    #[instrument(skip(self), fields(root_folder_id = %root_folder_id))]
    pub async fn build_tree(&self, root_folder_id: &str, root_name: &str) -> Result<Album> {
        let mut visited = HashSet::new();
        let root = self
            .build_album(root_folder_id.to_string(), root_name.to_string(), 0, &mut visited)
            .await?;

        debug!(
            albums = root.total_sub_albums(),
            photos = root.total_photos(),
            "Album tree built"
        );
        Ok(root)
    }

    fn build_album<'a>(
        &'a self,
        folder_id: String,
        name: String,
        depth: usize,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<Album>> {
        Box::pin(async move {
            if depth > self.max_depth {
                return Err(SyncError::TreeDepthExceeded {
                    limit: self.max_depth,
                    folder_id,
                });
            }
            visited.insert(folder_id.clone());

            let children = self.source.list_children(&folder_id).await?;
            let (folders, files): (Vec<RemoteItem>, Vec<RemoteItem>) =
                children.into_iter().partition(|item| item.is_folder);

            let mut album = Album::new(folder_id, name);

            for folder in folders {
                if visited.contains(&folder.id) {
                    warn!(
                        folder_id = %folder.id,
                        parent = %album.id,
                        "Folder already visited, skipping"
                    );
                    continue;
                }
                let sub = self
                    .build_album(folder.id, folder.name, depth + 1, visited)
                    .await?;
                album.sub_albums.push(sub);
            }

            album.photos = files
                .into_iter()
                .filter(RemoteItem::is_image)
                .map(|item| self.photo_from(item))
                .collect();

            sort_photos(&mut album.photos, self.photo_order);
            album
                .sub_albums
                .sort_by(|a, b| natural_cmp(&a.name, &b.name).then_with(|| a.id.cmp(&b.id)));
            album.cover_id = cover_for(&album);

            Ok(album)
        })
    }

    fn photo_from(&self, item: RemoteItem) -> PhotoItem {
        let proxy = self.proxy_url(&item.id);
        PhotoItem {
            thumbnail_ref: proxy.clone(),
            full_ref: proxy,
            id: item.id,
            name: item.name,
            width: item.width,
            height: item.height,
            created_time: item.created_time,
            modified_time: item.modified_time,
        }
    }
}

fn sort_photos(photos: &mut [PhotoItem], order: SortOrder) {
    photos.sort_by(|a, b| {
        let by_name = natural_cmp(&a.name, &b.name).then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => by_name,
            SortOrder::Desc => by_name.reverse(),
        }
    });
}

fn cover_for(album: &Album) -> Option<String> {
    album
        .photos
        .first()
        .map(|photo| photo.id.clone())
        .or_else(|| album.sub_albums.iter().find_map(|sub| sub.cover_id.clone()))
}

/// Case-insensitive comparison treating digit runs as numbers, so `img2`
/// sorts before `img10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        let (l, r) = match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => (l, r),
        };

        let ord = if l.is_ascii_digit() && r.is_ascii_digit() {
            compare_numbers(&take_digits(&mut left), &take_digits(&mut right))
        } else {
            left.next();
            right.next();
            l.to_lowercase().cmp(r.to_lowercase())
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

/// Compare digit strings by value without parsing (no overflow on long runs).
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a_trimmed = a.trim_start_matches('0');
    let b_trimmed = b.trim_start_matches('0');
    a_trimmed
        .len()
        .cmp(&b_trimmed.len())
        .then_with(|| a_trimmed.cmp(b_trimmed))
        .then_with(|| a.len().cmp(&b.len()))
}

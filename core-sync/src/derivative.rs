//! # Image Derivative Pipeline
//!
//! Maps `(remote file id, profile)` to exactly one file under the images
//! directory and keeps it current:
//!
//! - local file newer than (or as new as) the remote: nothing to do
//! - otherwise: download, transcode, write atomically
//!
//! Batches run through [`DerivativePipeline::materialize_all`] with a
//! bounded number of concurrent jobs. A failed item never fails the batch.
//! If a derivative from an earlier pass is still on disk it stays in place
//! and keeps being referenced; otherwise the item is left out of the
//! returned refs so the caller falls back to the proxy URL for it.

use crate::{Result, SyncError};
use bridge_traits::remote::RemoteSource;
use bridge_traits::transcode::{DerivativeProfile, Transcoder};
use chrono::{DateTime, Utc};
use core_runtime::persist;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, instrument, warn};

const COVER_SUFFIX: &str = ".cover";

/// Naming scheme for derivative files.
///
/// The key of a derivative is its file name without extension: `<id>` for
/// catalog images and `<id>.cover` for covers. The orphan collector works
/// on keys.
#[derive(Debug, Clone)]
pub struct DerivativeStore {
    images_dir: PathBuf,
    public_prefix: String,
    extension: String,
}

impl DerivativeStore {
    pub fn new(
        images_dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            images_dir: images_dir.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
            extension: extension.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn key(file_id: &str, profile: DerivativeProfile) -> String {
        match profile {
            DerivativeProfile::Catalog => file_id.to_string(),
            DerivativeProfile::Cover => format!("{}{}", file_id, COVER_SUFFIX),
        }
    }

    pub fn file_name(&self, file_id: &str, profile: DerivativeProfile) -> Result<String> {
        validate_file_id(file_id)?;
        Ok(format!("{}.{}", Self::key(file_id, profile), self.extension))
    }

    pub fn path_for(&self, file_id: &str, profile: DerivativeProfile) -> Result<PathBuf> {
        Ok(self.images_dir.join(self.file_name(file_id, profile)?))
    }

    /// URL under which the derivative is served.
    pub fn local_ref(&self, file_id: &str, profile: DerivativeProfile) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.public_prefix,
            self.file_name(file_id, profile)?
        ))
    }

    /// Inverse of [`DerivativeStore::file_name`]; `None` for foreign files.
    pub fn key_from_file_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(self.extension.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|key| !key.is_empty())
    }
}

/// Remote ids end up in file names; anything outside `[A-Za-z0-9_-]` could
/// escape the images directory.
fn validate_file_id(file_id: &str) -> Result<()> {
    let valid = !file_id.is_empty()
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SyncError::Provider(format!(
            "Refusing unsafe file id for derivative name: {:?}",
            file_id
        )))
    }
}

/// One image to materialize.
#[derive(Debug, Clone)]
pub struct DerivativeRequest {
    pub file_id: String,
    pub name: String,
    pub modified_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// Existing file was current
    Fresh,
    Regenerated { width: u32, height: u32 },
}

#[derive(Debug, Clone)]
pub struct Materialized {
    pub local_ref: String,
    pub outcome: MaterializeOutcome,
}

/// Result of a batch. `refs` holds only the ids that have a usable
/// derivative after the batch, including failed items whose previous
/// derivative was kept.
#[derive(Debug, Default, Clone)]
pub struct MaterializeReport {
    pub refs: HashMap<String, String>,
    pub transcoded: usize,
    pub fresh: usize,
    pub failed: usize,
    /// Failed items still served from an earlier derivative
    pub kept_previous: usize,
}

pub struct DerivativePipeline {
    source: Arc<dyn RemoteSource>,
    transcoder: Arc<dyn Transcoder>,
    store: DerivativeStore,
    max_concurrent: usize,
}

impl DerivativePipeline {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        transcoder: Arc<dyn Transcoder>,
        store: DerivativeStore,
        max_concurrent: usize,
    ) -> Self {
        Self {
            source,
            transcoder,
            store,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn store(&self) -> &DerivativeStore {
        &self.store
    }

    #[instrument(skip(self, request), fields(file_id = %request.file_id, profile = %profile))]
    pub async fn ensure_derivative(
        &self,
        request: &DerivativeRequest,
        profile: DerivativeProfile,
    ) -> Result<Materialized> {
        let path = self.store.path_for(&request.file_id, profile)?;
        let local_ref = self.store.local_ref(&request.file_id, profile)?;

        if !needs_update(&path, request.modified_time).await? {
            return Ok(Materialized {
                local_ref,
                outcome: MaterializeOutcome::Fresh,
            });
        }

        debug!(name = %request.name, "Regenerating derivative");
        let original = self.source.download_bytes(&request.file_id).await?;
        let image = self.transcoder.transcode(original, profile).await?;
        persist::write_atomic(&path, &image.bytes).await?;

        Ok(Materialized {
            local_ref,
            outcome: MaterializeOutcome::Regenerated {
                width: image.width,
                height: image.height,
            },
        })
    }

    /// Materialize every request under `profile`, at most `max_concurrent`
    /// at a time.
    ///
    /// Authentication failures are the one exception to per-item skipping:
    /// once the remote rejects our credentials every remaining item would
    /// fail the same way, so the batch reports it to the caller.
    pub async fn materialize_all(
        &self,
        requests: Vec<DerivativeRequest>,
        profile: DerivativeProfile,
    ) -> Result<MaterializeReport> {
        let results: Vec<(String, Result<Materialized>)> = stream::iter(requests)
            .map(|request| async move {
                let result = self.ensure_derivative(&request, profile).await;
                (request.file_id, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = MaterializeReport::default();
        let mut auth_failure = None;

        for (file_id, result) in results {
            match result {
                Ok(materialized) => {
                    match materialized.outcome {
                        MaterializeOutcome::Fresh => report.fresh += 1,
                        MaterializeOutcome::Regenerated { .. } => report.transcoded += 1,
                    }
                    report.refs.insert(file_id, materialized.local_ref);
                }
                Err(SyncError::Auth(msg)) => {
                    report.failed += 1;
                    auth_failure = Some(msg);
                }
                Err(e) => {
                    report.failed += 1;
                    match self.previous_ref(&file_id, profile).await {
                        Some(local_ref) => {
                            warn!(
                                file_id = %file_id,
                                profile = %profile,
                                error = %e,
                                "Derivative failed, keeping previous file"
                            );
                            report.kept_previous += 1;
                            report.refs.insert(file_id, local_ref);
                        }
                        None => {
                            warn!(
                                file_id = %file_id,
                                profile = %profile,
                                error = %e,
                                "Derivative failed, skipping"
                            );
                        }
                    }
                }
            }
        }

        if let Some(msg) = auth_failure {
            return Err(SyncError::Auth(msg));
        }

        debug!(
            profile = %profile,
            transcoded = report.transcoded,
            fresh = report.fresh,
            failed = report.failed,
            kept_previous = report.kept_previous,
            "Derivative batch finished"
        );
        Ok(report)
    }

    /// Local ref of a derivative written by an earlier pass, if it is
    /// still on disk.
    async fn previous_ref(&self, file_id: &str, profile: DerivativeProfile) -> Option<String> {
        let path = self.store.path_for(file_id, profile).ok()?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => self.store.local_ref(file_id, profile).ok(),
            _ => None,
        }
    }
}

/// Missing local file always needs work. Without a remote timestamp an
/// existing file is kept.
async fn needs_update(path: &Path, remote_modified: Option<DateTime<Utc>>) -> Result<bool> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };

    let Some(remote_modified) = remote_modified else {
        return Ok(false);
    };

    let local_modified: DateTime<Utc> = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .into();
    Ok(remote_modified > local_modified)
}

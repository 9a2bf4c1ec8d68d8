//! Crash-safe file persistence.
//!
//! Every file the mirror publishes (cache, status, config, derivatives) is
//! written to a uniquely named sibling temp file, flushed, then renamed over
//! the target. A reader sees either the old file or the new one, never a
//! partial write.

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix of in-flight temp files. Anything ending in it is disposable.
pub const TEMP_SUFFIX: &str = ".tmp";

/// True for temp files left behind by [`write_atomic`].
pub fn is_temp_file(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX)
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Not a file path: {}", path.display())))?;
    let temp_name = format!(
        ".{}.{}{}",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple(),
        TEMP_SUFFIX
    );
    Ok(path.with_file_name(temp_name))
}

/// Atomically replace `path` with `bytes`, creating parent directories.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path_for(path)?;
    let written = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
            warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp file");
        }
        return Err(e.into());
    }

    debug!(path = %path.display(), bytes = bytes.len(), "File written atomically");
    Ok(())
}

/// Pretty-printed JSON through [`write_atomic`].
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json).await
}

/// `Ok(None)` when the file does not exist; parse errors are reported.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_file(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_json_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        assert_eq!(read_json::<Doc>(&path).await.unwrap(), None);

        let doc = Doc {
            name: "albums".to_string(),
            count: 3,
        };
        write_json_atomic(&path, &doc).await.unwrap();
        assert_eq!(read_json::<Doc>(&path).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_read_json_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        tokio::fs::write(&path, b"{\"name\": \"trunc").await.unwrap();

        assert!(matches!(
            read_json::<Doc>(&path).await,
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_temp_file_detection() {
        assert!(is_temp_file(".structure.json.0f3a.tmp"));
        assert!(!is_temp_file("structure.json"));
        assert!(!is_temp_file("photo.tmp"));
    }
}

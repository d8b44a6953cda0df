//! File-system object store with resumable chunked uploads.
//!
//! Objects live under `{root}/objects/{path}`; in-flight uploads accumulate in
//! `{root}/partial/{path}` and are moved into place on the final chunk, so a
//! reader never sees a half-written object.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::AppError;
use crate::models::UploadStatus;

/// Top-level prefix of every plant image.
pub const IMAGE_PREFIX: &str = "herb_images";

/// Object store rooted at a local directory.
pub struct ObjectStorage {
    root: PathBuf,
    public_url: String,
}

impl ObjectStorage {
    /// Open (and create) the store.
    pub async fn open(root: &Path, public_url: &str) -> Result<Self, AppError> {
        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("partial")).await?;

        Ok(Self {
            root: root.to_path_buf(),
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Public URL of an object path.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/storage/{}", self.public_url, path)
    }

    /// Append one chunk. `offset` must equal the bytes already received.
    pub async fn append_chunk(
        &self,
        path: &str,
        offset: u64,
        chunk: &[u8],
        is_final: bool,
    ) -> Result<UploadStatus, AppError> {
        let relative = validate_path(path)?;
        let partial = self.root.join("partial").join(&relative);
        let target = self.root.join("objects").join(&relative);

        if fs::try_exists(&target).await? {
            return Err(AppError::Conflict {
                message: format!("Object {} already exists", path),
                details: None,
            });
        }

        let received = match fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if offset != received {
            return Err(AppError::Conflict {
                message: format!("Upload offset mismatch: expected {}", received),
                details: Some(serde_json::json!({ "received": received })),
            });
        }

        if let Some(parent) = partial.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&partial)
            .await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        let received = received + chunk.len() as u64;

        if !is_final {
            return Ok(UploadStatus {
                path: path.to_string(),
                received,
                complete: false,
                url: None,
            });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&partial, &target).await?;
        tracing::info!("Stored object {} ({} bytes)", path, received);

        Ok(UploadStatus {
            path: path.to_string(),
            received,
            complete: true,
            url: Some(self.public_url(path)),
        })
    }

    /// Read a committed object.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, AppError> {
        let relative = validate_path(path)?;
        match fs::read(self.root.join("objects").join(relative)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Object {} not found", path)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Owner segment of an image path: `herb_images/{uid}/...`.
pub fn path_owner(path: &str) -> Option<&str> {
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(IMAGE_PREFIX), Some(uid), Some(name)) if !uid.is_empty() && !name.is_empty() => {
            Some(uid)
        }
        _ => None,
    }
}

/// Reject absolute paths and anything that could escape the store root.
fn validate_path(path: &str) -> Result<PathBuf, AppError> {
    if path.is_empty() || path.ends_with('/') {
        return Err(AppError::Validation(format!("Invalid object path {:?}", path)));
    }
    let candidate = Path::new(path);
    if !candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(AppError::Validation(format!("Invalid object path {:?}", path)));
    }
    Ok(candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_owner() {
        assert_eq!(path_owner("herb_images/u1/1_mint.jpg"), Some("u1"));
        assert_eq!(path_owner("herb_images/u1"), None);
        assert_eq!(path_owner("other/u1/x.jpg"), None);
        assert_eq!(path_owner("herb_images//x.jpg"), None);
    }

    #[test]
    fn test_validate_path_rejects_traversal() {
        assert!(validate_path("herb_images/u1/../../etc/passwd").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("").is_err());
        assert!(validate_path("herb_images/u1/ok.jpg").is_ok());
    }

    #[tokio::test]
    async fn test_chunked_upload_commits_on_final() {
        let temp_dir = TempDir::new().unwrap();
        let store = ObjectStorage::open(temp_dir.path(), "http://host/")
            .await
            .unwrap();
        let path = "herb_images/u1/1_basil.jpg";

        let first = store.append_chunk(path, 0, b"hello ", false).await.unwrap();
        assert_eq!(first.received, 6);
        assert!(!first.complete);
        assert!(store.read(path).await.is_err());

        let last = store.append_chunk(path, 6, b"world", true).await.unwrap();
        assert!(last.complete);
        assert_eq!(
            last.url.as_deref(),
            Some("http://host/storage/herb_images/u1/1_basil.jpg")
        );
        assert_eq!(store.read(path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_offset_mismatch_reports_received() {
        let temp_dir = TempDir::new().unwrap();
        let store = ObjectStorage::open(temp_dir.path(), "http://host")
            .await
            .unwrap();
        let path = "herb_images/u1/2_sage.jpg";

        store.append_chunk(path, 0, b"abc", false).await.unwrap();
        let err = store.append_chunk(path, 0, b"abc", false).await.unwrap_err();
        match err {
            AppError::Conflict { details, .. } => {
                assert_eq!(details.unwrap()["received"], 3);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }
}

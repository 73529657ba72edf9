//! Object storage adapter.
//!
//! The pipeline talks to blob storage through the [`ObjectStorage`] trait so
//! deployments can swap the backing store. The bundled implementation is a
//! local filesystem store laid out under a configured root directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use log::debug;

use crate::error::PipelineError;

/// Byte-exact blob store. All operations are idempotent from the caller's
/// perspective; a missing key on `get`/`delete` is a non-retryable NotFound,
/// transient I/O failures are retryable.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store bytes under `key` and return an opaque locator URL.
    async fn put(&self, bytes: &[u8], key: &str, content_type: &str)
        -> Result<String, PipelineError>;

    /// Fetch the full object for a locator previously returned by `put`.
    async fn get(&self, url: &str) -> Result<Vec<u8>, PipelineError>;

    /// Delete the object. Deleting an already-deleted object is an error so
    /// callers that need idempotency can downgrade NotFound themselves.
    async fn delete(&self, url: &str) -> Result<(), PipelineError>;

    /// Produce a time-limited URL for direct client access.
    async fn presign(&self, url: &str, ttl_secs: u64) -> Result<String, PipelineError>;
}

/// Local-filesystem store. Objects live at `<root>/<key>`; the returned
/// locator is `file://<absolute path>`.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    fn path_for_url(&self, url: &str) -> Result<PathBuf, PipelineError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| PipelineError::NotFound(format!("unknown storage url: {}", url)))?;
        Ok(PathBuf::from(path))
    }

    fn url_for_path(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

#[async_trait]
impl ObjectStorage for FsStorage {
    async fn put(
        &self,
        bytes: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::transient("create storage dir", e))?;
        }

        // Write to a sibling temp file then rename so readers never observe
        // a partial object.
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| PipelineError::transient("write object", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| PipelineError::transient("finalize object", e))?;

        debug!(
            "Stored {} bytes at {} ({})",
            bytes.len(),
            path.display(),
            content_type
        );
        Ok(Self::url_for_path(&path))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let path = self.path_for_url(url)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(format!("no object at {}", url)))
            }
            Err(e) => Err(PipelineError::transient("read object", e)),
        }
    }

    async fn delete(&self, url: &str) -> Result<(), PipelineError> {
        let path = self.path_for_url(url)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(format!("no object at {}", url)))
            }
            Err(e) => Err(PipelineError::transient("delete object", e)),
        }
    }

    async fn presign(&self, url: &str, ttl_secs: u64) -> Result<String, PipelineError> {
        // Verify the object exists before handing out a link.
        let path = self.path_for_url(url)?;
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| PipelineError::transient("stat object", e))?
        {
            return Err(PipelineError::NotFound(format!("no object at {}", url)));
        }

        let expires_at = Utc::now().timestamp() + ttl_secs as i64;
        let token =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(expires_at.to_string());
        Ok(format!("{}?expires={}", url, token))
    }
}

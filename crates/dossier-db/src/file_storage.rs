//! Checksums, storage keys, and object store backends.
//!
//! Storage keys are owner-partitioned and human-traceable:
//! `{owner_id}/{YYYY}/{MM}/{DD}/{epoch_millis}_{sanitized_file_name}`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dossier_db::file_storage::{compute_checksum, StoragePathBuilder, StorageUploader};
//!
//! let checksum = compute_checksum(&data);
//! let path = StoragePathBuilder::build_unique("user-1", "My CV.pdf", Utc::now());
//! uploader.upload(&data, &path, "application/pdf", token).await?;
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use dossier_core::{defaults, Error, ObjectStore, Result};

/// SHA-256 of the raw bytes as 64 lowercase hex characters.
pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds deterministic, owner-partitioned storage keys.
pub struct StoragePathBuilder;

impl StoragePathBuilder {
    /// `{owner}/{YYYY}/{MM}/{DD}/{millis}_{sanitized}`.
    ///
    /// Two uploads of the same name by the same owner within one millisecond
    /// collide; use [`StoragePathBuilder::build_unique`] on the upload path.
    pub fn build(owner_id: &str, file_name: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}_{}",
            owner_id,
            at.year(),
            at.month(),
            at.day(),
            at.timestamp_millis(),
            sanitize_file_name(file_name)
        )
    }

    /// Like [`StoragePathBuilder::build`] with a random suffix on the timestamp:
    /// `{owner}/{YYYY}/{MM}/{DD}/{millis}-{8 hex}_{sanitized}`.
    pub fn build_unique(owner_id: &str, file_name: &str, at: DateTime<Utc>) -> String {
        let suffix: u32 = rand::thread_rng().gen();
        format!(
            "{}/{:04}/{:02}/{:02}/{}-{:08x}_{}",
            owner_id,
            at.year(),
            at.month(),
            at.day(),
            at.timestamp_millis(),
            suffix,
            sanitize_file_name(file_name)
        )
    }
}

// =============================================================================
// FILESYSTEM BACKEND
// =============================================================================

/// Local filesystem object store.
///
/// The bearer token is accepted for interface parity and not checked;
/// files are written atomically (temp file + rename) under `base_path`.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a storage key, refusing keys that escape the base directory.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(Error::InvalidInput(format!("Invalid storage path: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    /// Write, read back and delete a probe object under the base directory.
    ///
    /// An unwritable or unmounted storage directory is a configuration
    /// problem, reported as `Error::Config` before any upload is accepted.
    pub async fn validate(&self) -> Result<()> {
        let probe = self.base_path.join(".probe");
        let config_err = |step: &str, e: std::io::Error| {
            Error::Config(format!(
                "Storage {} failed at {}: {}",
                step,
                probe.display(),
                e
            ))
        };

        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| config_err("mkdir", e))?;
        fs::write(&probe, PROBE_BYTES)
            .await
            .map_err(|e| config_err("write", e))?;
        let read_back = fs::read(&probe).await.map_err(|e| config_err("read", e))?;
        fs::remove_file(&probe)
            .await
            .map_err(|e| config_err("cleanup", e))?;
        if read_back != PROBE_BYTES {
            return Err(Error::Config(format!(
                "Storage at {} returned different bytes than written",
                self.base_path.display()
            )));
        }
        Ok(())
    }
}

const PROBE_BYTES: &[u8] = b"dossier-storage-probe";

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, path: &str, data: &[u8], _content_type: &str, _token: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        debug!(storage_path = %path, size = data.len(), "file_storage: write");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "file_storage: create_dir_all failed");
                e
            })?;
        }

        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "file_storage: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn get(&self, path: &str, _token: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

// =============================================================================
// IN-MEMORY BACKEND
// =============================================================================

/// In-memory object store for tests and local runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored content type, if the key exists.
    pub async fn content_type(&self, path: &str) -> Option<String> {
        self.objects.read().await.get(path).map(|(_, ct)| ct.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str, _token: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, path: &str, _token: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", path)))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// UPLOADER
// =============================================================================

/// Time-bounded access to an [`ObjectStore`].
///
/// A timeout surfaces as the retryable [`Error::Timeout`]; other failures
/// keep the classification the backend gave them.
#[derive(Clone)]
pub struct StorageUploader {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl StorageUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(defaults::STORAGE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Store bytes at `path`. Returns the storage path on success.
    #[instrument(skip(self, data, token), fields(subsystem = "storage", component = "uploader", op = "upload", backend = self.store.name(), storage_path = %path, byte_size = data.len()))]
    pub async fn upload(
        &self,
        data: &[u8],
        path: &str,
        content_type: &str,
        token: &str,
    ) -> Result<String> {
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.store.put(path, data, content_type, token),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                debug!(duration_ms, "Upload stored");
                Ok(path.to_string())
            }
            Ok(Err(e)) => {
                warn!(duration_ms, error = %e, retryable = e.is_retryable(), "Upload failed");
                Err(e)
            }
            Err(_) => {
                warn!(duration_ms, retryable = true, "Upload timed out");
                Err(Error::timeout("storage upload", self.timeout.as_secs()))
            }
        }
    }

    /// Read back stored bytes, bounded by the same timeout.
    #[instrument(skip(self, token), fields(subsystem = "storage", component = "uploader", op = "download", storage_path = %path))]
    pub async fn download(&self, path: &str, token: &str) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.timeout, self.store.get(path, token)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("storage download", self.timeout.as_secs())),
        }
    }
}

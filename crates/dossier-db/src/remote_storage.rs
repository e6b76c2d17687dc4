//! HTTP object store client.
//!
//! Talks to a bucket-style storage API: `PUT {base}/object/{bucket}/{path}`
//! uploads, `GET` on the same URL reads back. Requests carry the caller's
//! bearer token so the storage service applies its own access policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, warn};

use dossier_core::{defaults, Error, ObjectStore, Result};

/// Configuration for [`HttpObjectStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpObjectStoreConfig {
    pub base_url: String,
    pub bucket: String,
    pub timeout_secs: u64,
}

impl HttpObjectStoreConfig {
    /// Read `DOSSIER_STORAGE_URL` and `DOSSIER_STORAGE_BUCKET`.
    ///
    /// Returns `None` when no storage URL is configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("DOSSIER_STORAGE_URL").ok()?;
        let bucket =
            std::env::var("DOSSIER_STORAGE_BUCKET").unwrap_or_else(|_| "sources".to_string());
        Some(Self {
            base_url,
            bucket,
            timeout_secs: defaults::STORAGE_TIMEOUT_SECS,
        })
    }
}

/// Object store backed by a remote HTTP storage service.
pub struct HttpObjectStore {
    client: Client,
    config: HttpObjectStoreConfig,
}

impl HttpObjectStore {
    pub fn new(config: HttpObjectStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build storage client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Error::from_http_status(status, body)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str, token: &str) -> Result<()> {
        let url = self.object_url(path);
        debug!(storage_path = %path, size = data.len(), "remote_storage: put");

        let response = self
            .client
            .put(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, content_type)
            .body(data.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(storage_path = %path, error = %err, retryable = err.is_retryable(), "remote_storage: put rejected");
            return Err(err);
        }
        Ok(())
    }

    async fn get(&self, path: &str, token: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.object_url(path))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn name(&self) -> &str {
        "http"
    }
}

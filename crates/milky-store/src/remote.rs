//! Remote durable document stores.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::SyncError;

/// One named document, fetched and overwritten wholesale.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable location for logs and status.
    fn describe(&self) -> String;

    /// `Ok(None)` when the document does not exist yet.
    async fn download(&self) -> Result<Option<Vec<u8>>, SyncError>;

    /// Overwrite the document with the contents of `path`.
    async fn upload(&self, path: &Path, commit_message: &str) -> Result<(), SyncError>;
}

/// Hugging Face Hub dataset repository.
pub struct HfHubStore {
    client: Client,
    endpoint: String,
    repo_id: String,
    filename: String,
    token: SecretString,
}

impl HfHubStore {
    pub fn new(
        endpoint: &str,
        repo_id: &str,
        filename: &str,
        token: SecretString,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            repo_id: repo_id.to_string(),
            filename: filename.to_string(),
            token,
        })
    }

    fn resolve_url(&self) -> String {
        format!(
            "{}/datasets/{}/resolve/main/{}",
            self.endpoint, self.repo_id, self.filename
        )
    }

    fn commit_url(&self) -> String {
        format!("{}/api/datasets/{}/commit/main", self.endpoint, self.repo_id)
    }

    /// NDJSON commit body: a header line followed by one base64 file line.
    fn commit_body(&self, content: &[u8], commit_message: &str) -> Result<String, SyncError> {
        let header = serde_json::json!({
            "key": "header",
            "value": {"summary": commit_message, "description": ""}
        });
        let file = serde_json::json!({
            "key": "file",
            "value": {
                "content": base64::engine::general_purpose::STANDARD.encode(content),
                "path": self.filename,
                "encoding": "base64"
            }
        });
        Ok(format!(
            "{}\n{}\n",
            serde_json::to_string(&header)?,
            serde_json::to_string(&file)?
        ))
    }
}

#[async_trait]
impl RemoteStore for HfHubStore {
    fn describe(&self) -> String {
        format!("hf://datasets/{}/{}", self.repo_id, self.filename)
    }

    async fn download(&self) -> Result<Option<Vec<u8>>, SyncError> {
        let response = self
            .client
            .get(self.resolve_url())
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(repo = %self.repo_id, "remote document not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn upload(&self, path: &Path, commit_message: &str) -> Result<(), SyncError> {
        let content = tokio::fs::read(path).await?;
        let body = self.commit_body(&content, commit_message)?;
        let response = self
            .client
            .post(self.commit_url())
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }
        info!(repo = %self.repo_id, bytes = content.len(), "document committed");
        Ok(())
    }
}

/// Plain directory on local disk.
pub struct LocalDirStore {
    dir: PathBuf,
    filename: String,
}

impl LocalDirStore {
    pub fn new(dir: impl Into<PathBuf>, filename: &str) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.to_string(),
        }
    }

    fn target(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

#[async_trait]
impl RemoteStore for LocalDirStore {
    fn describe(&self) -> String {
        format!("file://{}", self.target().display())
    }

    async fn download(&self) -> Result<Option<Vec<u8>>, SyncError> {
        match tokio::fs::read(self.target()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, path: &Path, commit_message: &str) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let staging = self.dir.join(format!(".{}.partial", self.filename));
        tokio::fs::copy(path, &staging).await?;
        tokio::fs::rename(&staging, self.target()).await?;
        debug!(path = %self.target().display(), commit_message, "document written");
        Ok(())
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryRemote {
    document: Mutex<Option<Vec<u8>>>,
    commits: Mutex<Vec<String>>,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(bytes: Vec<u8>) -> Self {
        let remote = Self::default();
        *remote.document.lock() = Some(bytes);
        remote
    }

    pub fn document(&self) -> Option<Vec<u8>> {
        self.document.lock().clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().clone()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn download(&self) -> Result<Option<Vec<u8>>, SyncError> {
        if self.fail_downloads.load(Ordering::Relaxed) {
            return Err(SyncError::Network("simulated download failure".into()));
        }
        Ok(self.document.lock().clone())
    }

    async fn upload(&self, path: &Path, commit_message: &str) -> Result<(), SyncError> {
        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(SyncError::Status {
                status: 503,
                body: "simulated upload failure".into(),
            });
        }
        let bytes = tokio::fs::read(path).await?;
        *self.document.lock() = Some(bytes);
        self.commits.lock().push(commit_message.to_string());
        Ok(())
    }
}

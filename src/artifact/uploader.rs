// Artifact Uploader - Content-addressed storage for proof files and images
//
// URLs returned here are opaque to the rest of the system; they are stored
// verbatim in ledger calls and mirror records.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Errors from uploading an artifact
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Artifact is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Artifact is empty")]
    Empty,

    #[error("Upload transport failed: {0}")]
    Transport(String),

    #[error("Invalid uploader config: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration shared by uploaders
#[derive(Clone, Debug)]
pub struct UploaderConfig {
    /// Prefix the content id is appended to
    pub gateway: String,
    /// Largest accepted artifact in bytes
    pub max_bytes: usize,
}

impl UploaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(mut self, gateway: &str) -> Self {
        self.gateway = gateway.to_string();
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.gateway.is_empty() {
            return Err(UploadError::InvalidConfig("gateway must not be empty".to_string()));
        }
        if self.max_bytes == 0 {
            return Err(UploadError::InvalidConfig("max_bytes must be > 0".to_string()));
        }
        Ok(())
    }

    /// Reject artifacts the gateway would refuse
    pub fn check(&self, bytes: &[u8]) -> Result<(), UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    pub fn url_for(&self, content_id: &str) -> String {
        format!("{}{}", self.gateway, content_id)
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            gateway: "ipfs://".to_string(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Hex SHA-256 of the content
pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// UPLOADER TRAIT
// ============================================================================

/// Upload surface of the pinning service
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Store the bytes and return their URL
    async fn upload(&self, bytes: &[u8]) -> Result<String, UploadError>;
}

// ============================================================================
// MEMORY UPLOADER
// ============================================================================

/// In-memory uploader for tests and simulation
pub struct MemoryUploader {
    config: UploaderConfig,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failure_message: Option<String>,
    delay_ms: u64,
    upload_count: AtomicUsize,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::with_config(UploaderConfig::default())
    }

    pub fn with_config(config: UploaderConfig) -> Self {
        Self {
            config,
            objects: Mutex::new(HashMap::new()),
            failure_message: None,
            delay_ms: 0,
            upload_count: AtomicUsize::new(0),
        }
    }

    /// Configure every upload to fail with a transport error
    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure_message = Some(message.to_string());
        self
    }

    /// Add a delay before responding
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of upload attempts, including failed ones
    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::SeqCst)
    }

    /// Bytes stored under a URL
    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let id = url.strip_prefix(&self.config.gateway)?;
        self.objects.lock().ok()?.get(id).cloned()
    }
}

impl Default for MemoryUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactUploader for MemoryUploader {
    async fn upload(&self, bytes: &[u8]) -> Result<String, UploadError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.upload_count.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure_message {
            return Err(UploadError::Transport(message.clone()));
        }
        self.config.check(bytes)?;

        let id = content_id(bytes);
        self.objects
            .lock()
            .map_err(|_| UploadError::Transport("object map poisoned".to_string()))?
            .insert(id.clone(), bytes.to_vec());
        Ok(self.config.url_for(&id))
    }
}

// ============================================================================
// DIRECTORY UPLOADER
// ============================================================================

/// Uploader that pins artifacts as files named by their content id
pub struct DirectoryUploader {
    root: PathBuf,
    config: UploaderConfig,
}

impl DirectoryUploader {
    pub fn new<P: Into<PathBuf>>(root: P, config: UploaderConfig) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            root: root.into(),
            config,
        })
    }

    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        url.strip_prefix(&self.config.gateway)
            .map(|id| self.root.join(id))
    }
}

#[async_trait]
impl ArtifactUploader for DirectoryUploader {
    async fn upload(&self, bytes: &[u8]) -> Result<String, UploadError> {
        self.config.check(bytes)?;

        let id = content_id(bytes);
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let path = self.root.join(&id);
        if !path.exists() {
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| UploadError::Transport(e.to_string()))?;
        }
        Ok(self.config.url_for(&id))
    }
}

//! Blob Storage
//!
//! Stores raw file bytes addressed by `scheme://path` URIs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Upper bound on `_N` suffixes tried when a name is taken
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// File metadata from storage
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,
    /// Content type (MIME)
    pub content_type: String,
    /// SHA256 digest
    pub digest: String,
    /// Last modified time
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Result of a successful write
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// URI the bytes actually landed at
    pub uri: String,
    pub metadata: FileMetadata,
}

/// What to do when the target URI is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Pick the first free `name_N.ext` next to the requested name
    #[default]
    Rename,
    /// Atomically replace the existing blob
    Replace,
}

/// Blob store trait - unified interface for storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store data at a URI, returning the URI actually used
    async fn put(&self, uri: &str, data: Bytes, mode: WriteMode) -> StorageResult<StoredBlob>;

    /// Retrieve data by URI
    async fn get(&self, uri: &str) -> StorageResult<Bytes>;

    /// Delete data by URI; missing blobs are not an error
    async fn delete(&self, uri: &str) -> StorageResult<()>;

    /// Check if a blob exists
    async fn exists(&self, uri: &str) -> StorageResult<bool>;

    /// Get blob metadata
    async fn metadata(&self, uri: &str) -> StorageResult<FileMetadata>;

    /// Create the directory that will hold `uri`, including intermediate ones
    async fn ensure_directory(&self, uri: &str) -> StorageResult<()>;

    /// Copy a blob to a new URI
    async fn copy(&self, from_uri: &str, to_uri: &str, mode: WriteMode) -> StorageResult<StoredBlob> {
        let data = self.get(from_uri).await?;
        self.put(to_uri, data, mode).await
    }

    /// Public URL for a blob
    fn url(&self, uri: &str) -> String;

    /// Scheme used for newly generated URIs
    fn scheme(&self) -> &str;

    /// Get storage name for logging
    fn name(&self) -> &str;
}

/// Split `scheme://path` and reject anything that could escape the scheme root
pub fn split_uri(uri: &str) -> StorageResult<(&str, &str)> {
    let invalid = || StorageError::InvalidPath(uri.to_string());
    let (scheme, path) = uri.split_once("://").ok_or_else(invalid)?;

    if scheme.is_empty()
        || path.is_empty()
        || path.starts_with('/')
        || path.starts_with('\\')
        || path.split(|c: char| c == '/' || c == '\\').any(|s| s == "..")
    {
        return Err(invalid());
    }

    Ok((scheme, path))
}

/// `public://a/report.pdf` + 2 -> `public://a/report_2.pdf`
fn numbered_uri(uri: &str, n: u32) -> String {
    let (dir, name) = match uri.rfind('/') {
        Some(i) => uri.split_at(i + 1),
        None => ("", uri),
    };
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}_{}{}", dir, &name[..dot], n, &name[dot..]),
        _ => format!("{}{}_{}", dir, name, n),
    }
}

/// Generate a storage URI for an uploaded file
pub fn generate_uri(scheme: &str, filename: &str) -> String {
    let date = chrono::Utc::now().format("%Y-%m");
    format!("{}://{}/{}", scheme, date, sanitize_filename(filename))
}

/// Strip directories and control characters from a client-supplied name
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Calculate SHA256 digest
fn calculate_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Guess content type from the URI
fn guess_content_type(uri: &str) -> String {
    mime_guess::from_path(uri).first_or_octet_stream().to_string()
}

fn describe(uri: &str, data: &[u8]) -> FileMetadata {
    FileMetadata {
        size: data.len() as u64,
        content_type: guess_content_type(uri),
        digest: calculate_digest(data),
        last_modified: Some(chrono::Utc::now()),
    }
}

fn map_io_error(uri: &str, err: std::io::Error) -> StorageError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(uri.to_string()),
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(uri.to_string()),
        _ => StorageError::IoError(err),
    }
}

/// Temporary file that is removed on drop unless it was committed
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new_in(dir: &Path) -> Self {
        Self {
            path: dir.join(format!(".{}.tmp", Uuid::new_v4())),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "Failed to remove temporary file");
            }
        }
    }
}

/// Local filesystem storage
pub struct LocalStorage {
    /// Root directory for the scheme
    root: PathBuf,
    /// Scheme served from `root`
    scheme: String,
    /// Base URL for generating URLs
    base_url: String,
}

impl LocalStorage {
    /// Create a new local storage
    pub fn new(
        root: impl AsRef<Path>,
        scheme: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            scheme: scheme.into(),
            base_url: base_url.into(),
        }
    }

    /// Create storage in a fresh temp directory
    pub fn temp() -> std::io::Result<Self> {
        let dir = std::env::temp_dir()
            .join("file-entity-blobs")
            .join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(Self::new(dir, "public", "/files"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a URI to a full path
    fn resolve_path(&self, uri: &str) -> StorageResult<PathBuf> {
        let (scheme, path) = split_uri(uri)?;
        if scheme != self.scheme {
            return Err(StorageError::InvalidPath(uri.to_string()));
        }
        Ok(self.root.join(path))
    }

    /// Link a written temp file at the first free name at or next to `uri`
    ///
    /// `hard_link` refuses an existing target, so two writers can never land
    /// on the same name.
    async fn link_available(&self, temp: &Path, uri: &str) -> StorageResult<String> {
        let candidates =
            std::iter::once(uri.to_string()).chain((0..MAX_RENAME_ATTEMPTS).map(|n| numbered_uri(uri, n)));

        for candidate in candidates {
            let path = self.resolve_path(&candidate)?;
            match fs::hard_link(temp, &path).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(map_io_error(&candidate, e)),
            }
        }

        Err(StorageError::BackendError(format!(
            "No free name next to {}",
            uri
        )))
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    #[instrument(skip(self, data), fields(storage = "local", size = data.len()))]
    async fn put(&self, uri: &str, data: Bytes, mode: WriteMode) -> StorageResult<StoredBlob> {
        self.ensure_directory(uri).await?;

        let requested = self.resolve_path(uri)?;
        let dir = requested
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(uri.to_string()))?;

        // Readers of the final path only ever see a complete file
        let temp = TempFile::new_in(dir);
        let mut file = fs::File::create(temp.path())
            .await
            .map_err(|e| map_io_error(uri, e))?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        let final_uri = match mode {
            WriteMode::Replace => {
                fs::rename(temp.path(), &requested)
                    .await
                    .map_err(|e| map_io_error(uri, e))?;
                temp.commit();
                uri.to_string()
            }
            // The guard unlinks the temp name; the linked copy stays
            WriteMode::Rename => self.link_available(temp.path(), uri).await?,
        };
        let final_path = self.resolve_path(&final_uri)?;

        debug!(path = ?final_path, "File stored");

        Ok(StoredBlob {
            metadata: describe(&final_uri, &data),
            uri: final_uri,
        })
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn get(&self, uri: &str) -> StorageResult<Bytes> {
        let path = self.resolve_path(uri)?;
        let data = fs::read(&path).await.map_err(|e| map_io_error(uri, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn delete(&self, uri: &str) -> StorageResult<()> {
        let path = self.resolve_path(uri)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = ?path, "File deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io_error(uri, e)),
        }
    }

    async fn exists(&self, uri: &str) -> StorageResult<bool> {
        let path = self.resolve_path(uri)?;
        Ok(path.is_file())
    }

    async fn metadata(&self, uri: &str) -> StorageResult<FileMetadata> {
        let path = self.resolve_path(uri)?;
        let meta = fs::metadata(&path).await.map_err(|e| map_io_error(uri, e))?;
        let data = self.get(uri).await?;

        Ok(FileMetadata {
            size: meta.len(),
            content_type: guess_content_type(uri),
            digest: calculate_digest(&data),
            last_modified: meta.modified().ok().map(chrono::DateTime::from),
        })
    }

    async fn ensure_directory(&self, uri: &str) -> StorageResult<()> {
        let path = self.resolve_path(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(uri, e))?;
        }
        Ok(())
    }

    fn url(&self, uri: &str) -> String {
        let path = split_uri(uri).map(|(_, p)| p).unwrap_or(uri);
        format!("{}/{}", self.base_url, path)
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// In-memory storage for testing
pub struct MemoryStorage {
    files: RwLock<HashMap<String, (Bytes, FileMetadata)>>,
    fail_writes: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with `PermissionDenied`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    fn check_writable(&self, uri: &str) -> StorageResult<()> {
        split_uri(uri)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::PermissionDenied(uri.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStorage {
    async fn put(&self, uri: &str, data: Bytes, mode: WriteMode) -> StorageResult<StoredBlob> {
        self.check_writable(uri)?;

        let mut files = self.files.write().await;
        let final_uri = match mode {
            WriteMode::Replace => uri.to_string(),
            WriteMode::Rename if !files.contains_key(uri) => uri.to_string(),
            WriteMode::Rename => (0..MAX_RENAME_ATTEMPTS)
                .map(|n| numbered_uri(uri, n))
                .find(|candidate| !files.contains_key(candidate))
                .ok_or_else(|| StorageError::BackendError(format!("No free name next to {}", uri)))?,
        };

        let metadata = describe(&final_uri, &data);
        files.insert(final_uri.clone(), (data, metadata.clone()));

        Ok(StoredBlob {
            uri: final_uri,
            metadata,
        })
    }

    async fn get(&self, uri: &str) -> StorageResult<Bytes> {
        let files = self.files.read().await;
        files
            .get(uri)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }

    async fn delete(&self, uri: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        files.remove(uri);
        Ok(())
    }

    async fn exists(&self, uri: &str) -> StorageResult<bool> {
        let files = self.files.read().await;
        Ok(files.contains_key(uri))
    }

    async fn metadata(&self, uri: &str) -> StorageResult<FileMetadata> {
        let files = self.files.read().await;
        files
            .get(uri)
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }

    async fn ensure_directory(&self, uri: &str) -> StorageResult<()> {
        self.check_writable(uri)
    }

    fn url(&self, uri: &str) -> String {
        format!("/memory/{}", uri)
    }

    fn scheme(&self) -> &str {
        "public"
    }

    fn name(&self) -> &str {
        "memory"
    }
}

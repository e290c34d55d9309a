//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use fe_core::config::AppConfig;
use fe_files::{
    AttachmentListService, BlobStore, BulkStatusOperator, FileRecordManager, HttpFetcher,
    LocalStorage, MemoryAttachmentStore, MemoryFileRecordStore, RemoteFetcher, TransferCodec,
};
use tracing::info;

use crate::health::HealthChecker;

pub type Records = MemoryFileRecordStore;
pub type Attachments = MemoryAttachmentStore;
pub type Blobs = LocalStorage;

pub type Files = FileRecordManager<Records, Attachments, Blobs>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub files: Arc<Files>,
    pub codec: Arc<TransferCodec<Records, Attachments, Blobs>>,
    pub bulk: Arc<BulkStatusOperator<Records, Attachments, Blobs>>,
    pub attachments: Arc<AttachmentListService<Records, Attachments, Blobs>>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(config: AppConfig, storage: LocalStorage, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        info!(
            backend = storage.name(),
            scheme = storage.scheme(),
            root = %storage.root().display(),
            "Blob storage ready"
        );
        let health = Arc::new(HealthChecker::new(storage.root().to_path_buf()));
        let files = Arc::new(FileRecordManager::new(
            Arc::new(MemoryFileRecordStore::new()),
            Arc::new(MemoryAttachmentStore::new()),
            Arc::new(storage),
            config.files.clone(),
        ));

        Self {
            codec: Arc::new(TransferCodec::new(files.clone(), fetcher)),
            bulk: Arc::new(BulkStatusOperator::new(files.clone())),
            attachments: Arc::new(AttachmentListService::new(
                files.clone(),
                config.attachments.clone(),
            )),
            files,
            health,
            config: Arc::new(config),
        }
    }

    /// Wire up local storage and the HTTP fetcher from configuration
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.storage.local_path)?;
        let storage = LocalStorage::new(
            &config.storage.local_path,
            config.storage.scheme.clone(),
            config.storage.base_url.clone(),
        );
        let fetcher = HttpFetcher::new(Duration::from_secs(
            config.files.remote_fetch_timeout_seconds,
        ))?;

        Ok(Self::new(config, storage, Arc::new(fetcher)))
    }
}

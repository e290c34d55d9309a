//! Attachment List Manager
//!
//! Stores (parent, file) associations and applies reconciled lists under a
//! per-parent lock.

use std::sync::Arc;

use async_trait::async_trait;
use fe_core::config::AttachmentSettings;
use fe_core::Id;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::FileResult;
use crate::locks::KeyedLocks;
use crate::model::{Attachment, ParentRef};
use crate::policy::Operation;
use crate::reconcile::{reconcile, Reconciliation, Submission};
use crate::records::{FileRecordManager, FileRecordStore};
use crate::storage::BlobStore;

/// Attachment store trait
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Attachments of a parent, sorted by weight
    async fn list_for_parent(&self, parent_id: Id) -> FileResult<Vec<Attachment>>;

    /// Replace a parent's whole list
    async fn replace_for_parent(&self, parent_id: Id, attachments: Vec<Attachment>) -> FileResult<()>;

    /// Count attachments referencing a file
    async fn count_for_file(&self, file_id: Id) -> FileResult<usize>;

    /// Delete every attachment referencing a file, returning how many went
    async fn delete_for_file(&self, file_id: Id) -> FileResult<usize>;
}

/// In-memory attachment store for testing
pub struct MemoryAttachmentStore {
    attachments: RwLock<Vec<Attachment>>,
}

impl Default for MemoryAttachmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self {
            attachments: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn list_for_parent(&self, parent_id: Id) -> FileResult<Vec<Attachment>> {
        let attachments = self.attachments.read().await;
        let mut list: Vec<Attachment> = attachments
            .iter()
            .filter(|a| a.parent_id == parent_id)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.weight);
        Ok(list)
    }

    async fn replace_for_parent(&self, parent_id: Id, list: Vec<Attachment>) -> FileResult<()> {
        let mut attachments = self.attachments.write().await;
        attachments.retain(|a| a.parent_id != parent_id);
        attachments.extend(list.into_iter().map(|a| Attachment { parent_id, ..a }));
        Ok(())
    }

    async fn count_for_file(&self, file_id: Id) -> FileResult<usize> {
        let attachments = self.attachments.read().await;
        Ok(attachments.iter().filter(|a| a.file_id == file_id).count())
    }

    async fn delete_for_file(&self, file_id: Id) -> FileResult<usize> {
        let mut attachments = self.attachments.write().await;
        let before = attachments.len();
        attachments.retain(|a| a.file_id != file_id);
        Ok(before - attachments.len())
    }
}

/// Applies attachment list submissions
pub struct AttachmentListService<R: FileRecordStore, A: AttachmentStore, B: BlobStore> {
    files: Arc<FileRecordManager<R, A, B>>,
    settings: AttachmentSettings,
    parent_locks: KeyedLocks,
}

impl<R: FileRecordStore, A: AttachmentStore, B: BlobStore> AttachmentListService<R, A, B> {
    pub fn new(files: Arc<FileRecordManager<R, A, B>>, settings: AttachmentSettings) -> Self {
        Self {
            files,
            settings,
            parent_locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &AttachmentSettings {
        &self.settings
    }

    /// Attachments of a parent, sorted by weight
    pub async fn list(&self, parent_id: Id) -> FileResult<Vec<Attachment>> {
        self.files.attachments().list_for_parent(parent_id).await
    }

    /// Reconcile a submission and write the resulting list
    ///
    /// Every listed file must exist. The parent's lock is held for the whole
    /// diff and write, and each listed file's record lock from the existence
    /// check until the write, so a concurrent delete either sees the new
    /// attachment or makes this call fail.
    #[instrument(skip(self, submission), fields(parent_id = parent.parent_id, kind = parent.field_kind.as_str()))]
    pub async fn apply(&self, parent: ParentRef, submission: &Submission) -> FileResult<Reconciliation> {
        self.files.authorize(Operation::Reconcile, parent.parent_id)?;
        let _lock = self.parent_locks.lock(parent.parent_id).await;

        let store = self.files.attachments();
        let existing = store.list_for_parent(parent.parent_id).await?;
        let result = reconcile(&parent, submission, &existing, &self.settings)?;

        let _records = self
            .files
            .lock_records(result.attachments.iter().map(|a| a.file_id))
            .await;
        for attachment in &result.attachments {
            self.files.get(attachment.file_id).await?;
            if !existing.iter().any(|a| a.file_id == attachment.file_id) {
                debug!(file_id = attachment.file_id, "New attachment");
            }
        }

        store
            .replace_for_parent(parent.parent_id, result.attachments.clone())
            .await?;

        info!(
            parent_id = parent.parent_id,
            count = result.attachments.len(),
            removed = result.removed.len(),
            "Attachment list reconciled"
        );

        Ok(result)
    }
}

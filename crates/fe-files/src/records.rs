//! File Record Manager
//!
//! Owns file records and keeps each record's `uri` backed by a stored blob.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fe_core::config::{DeletePolicy, FileSettings};
use fe_core::Id;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::attachments::AttachmentStore;
use crate::error::{FileError, FileResult};
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::model::{FileRecord, FileStatus, NewFileRecord};
use crate::policy::{AccessPolicy, AllowAll, Operation};
use crate::storage::{generate_uri, BlobStore, StoredBlob, WriteMode};

/// File record store trait
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Create a record, assigning its id
    async fn create(&self, record: NewFileRecord) -> FileResult<FileRecord>;

    /// Get a record by id
    async fn get(&self, id: Id) -> FileResult<Option<FileRecord>>;

    /// Update an existing record
    async fn update(&self, record: &FileRecord) -> FileResult<()>;

    /// Delete a record
    async fn delete(&self, id: Id) -> FileResult<()>;

    /// All records whose status is temporary
    async fn list_temporary(&self) -> FileResult<Vec<FileRecord>>;
}

/// In-memory file record store for testing
pub struct MemoryFileRecordStore {
    records: RwLock<BTreeMap<Id, FileRecord>>,
    next_id: AtomicI64,
}

impl Default for MemoryFileRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl FileRecordStore for MemoryFileRecordStore {
    async fn create(&self, record: NewFileRecord) -> FileResult<FileRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = record.into_record(id);

        let mut records = self.records.write().await;
        records.insert(id, record.clone());

        Ok(record)
    }

    async fn get(&self, id: Id) -> FileResult<Option<FileRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, record: &FileRecord) -> FileResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(FileError::NotFound(record.id)),
        }
    }

    async fn delete(&self, id: Id) -> FileResult<()> {
        let mut records = self.records.write().await;
        records.remove(&id);
        Ok(())
    }

    async fn list_temporary(&self) -> FileResult<Vec<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.status == FileStatus::Temporary)
            .cloned()
            .collect())
    }
}

/// File record manager
pub struct FileRecordManager<R: FileRecordStore, A: AttachmentStore, B: BlobStore> {
    records: Arc<R>,
    attachments: Arc<A>,
    blobs: Arc<B>,
    policy: Arc<dyn AccessPolicy>,
    settings: FileSettings,
    record_locks: KeyedLocks,
}

impl<R: FileRecordStore, A: AttachmentStore, B: BlobStore> FileRecordManager<R, A, B> {
    pub fn new(records: Arc<R>, attachments: Arc<A>, blobs: Arc<B>, settings: FileSettings) -> Self {
        Self {
            records,
            attachments,
            blobs,
            policy: Arc::new(AllowAll),
            settings,
            record_locks: KeyedLocks::new(),
        }
    }

    /// Replace the default allow-all policy
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    pub fn attachments(&self) -> &Arc<A> {
        &self.attachments
    }

    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    pub(crate) fn authorize(&self, operation: Operation, target: Id) -> FileResult<()> {
        if self.policy.authorize(operation, target) {
            Ok(())
        } else {
            Err(FileError::Forbidden(format!(
                "{} is not allowed on {}",
                operation.as_str(),
                target
            )))
        }
    }

    pub(crate) fn check_size(&self, size: u64) -> FileResult<()> {
        if size > self.settings.max_file_size {
            return Err(FileError::FileTooLarge {
                size,
                max: self.settings.max_file_size,
            });
        }
        Ok(())
    }

    /// Register a blob that is already in storage
    #[instrument(skip(self))]
    pub async fn create(&self, filename: &str, uri: &str) -> FileResult<FileRecord> {
        let metadata = self
            .blobs
            .metadata(uri)
            .await
            .map_err(|e| FileError::unreadable(uri, e))?;
        let blob = StoredBlob {
            uri: uri.to_string(),
            metadata,
        };

        let record = self
            .records
            .create(NewFileRecord::from_blob(filename, &blob))
            .await?;
        info!(id = record.id, uri = %record.uri, "File record created");

        Ok(record)
    }

    /// Store uploaded bytes under a generated URI and create a temporary record
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload(&self, filename: &str, data: Bytes) -> FileResult<FileRecord> {
        self.check_size(data.len() as u64)?;

        let uri = generate_uri(self.blobs.scheme(), filename);
        let blob = self
            .blobs
            .put(&uri, data, WriteMode::Rename)
            .await
            .map_err(|e| FileError::write_failed(&uri, e))?;

        self.ingest(None, filename.to_string(), None, blob).await
    }

    /// Get a record by id
    pub async fn get(&self, id: Id) -> FileResult<FileRecord> {
        self.records.get(id).await?.ok_or(FileError::NotFound(id))
    }

    /// Get a record together with its bytes
    pub async fn read(&self, id: Id) -> FileResult<(FileRecord, Bytes)> {
        let record = self.get(id).await?;
        let data = self
            .blobs
            .get(&record.uri)
            .await
            .map_err(|e| FileError::unreadable(&record.uri, e))?;
        Ok((record, data))
    }

    /// Persist metadata edits (filename, status, MIME type)
    #[instrument(skip(self, record), fields(id = record.id))]
    pub async fn save(&self, record: FileRecord) -> FileResult<FileRecord> {
        let _lock = self.record_locks.lock(record.id).await;
        let stored = self.get(record.id).await?;

        if stored.uri != record.uri {
            return Err(FileError::UriImmutable(record.id));
        }

        let updated = FileRecord {
            filesize: stored.filesize,
            digest: stored.digest,
            created_at: stored.created_at,
            changed_at: Utc::now(),
            ..record
        };
        self.records.update(&updated).await?;
        debug!(id = updated.id, "File record saved");

        Ok(updated)
    }

    /// Change the status of one record
    #[instrument(skip(self))]
    pub async fn set_status(&self, id: Id, status: FileStatus) -> FileResult<FileRecord> {
        self.authorize(Operation::SetStatus, id)?;
        let _lock = self.record_locks.lock(id).await;

        let mut record = self.get(id).await?;
        match status {
            FileStatus::Permanent => record.set_permanent(),
            FileStatus::Temporary => record.set_temporary(),
        }
        record.changed_at = Utc::now();
        self.records.update(&record).await?;

        debug!(id = id, status = %status, "File status changed");
        Ok(record)
    }

    /// Delete a record, its attachments, and its blob
    ///
    /// Deleting an id that does not exist succeeds, so retries are safe.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Id) -> FileResult<()> {
        self.authorize(Operation::Delete, id)?;
        let _lock = self.record_locks.lock(id).await;

        let Some(record) = self.records.get(id).await? else {
            debug!(id = id, "File already gone");
            return Ok(());
        };

        let count = self.attachments.count_for_file(id).await?;
        if count > 0 {
            if self.settings.delete_policy == DeletePolicy::Reject {
                return Err(FileError::ReferencedByAttachment { id, count });
            }
            let removed = self.attachments.delete_for_file(id).await?;
            info!(id = id, removed = removed, "Attachments removed with file");
        }

        self.purge(&record).await?;
        info!(id = id, filename = %record.filename, "File deleted");

        Ok(())
    }

    /// Move a record's blob to a new URI
    #[instrument(skip(self))]
    pub async fn relocate(&self, id: Id, new_uri: &str) -> FileResult<FileRecord> {
        let _lock = self.record_locks.lock(id).await;
        let mut record = self.get(id).await?;

        let data = self
            .blobs
            .get(&record.uri)
            .await
            .map_err(|e| FileError::unreadable(&record.uri, e))?;
        self.blobs
            .ensure_directory(new_uri)
            .await
            .map_err(|e| FileError::write_failed(new_uri, e))?;
        let blob = self
            .blobs
            .put(new_uri, data, WriteMode::Rename)
            .await
            .map_err(|e| FileError::write_failed(new_uri, e))?;

        let old_uri = record.uri.clone();
        record.apply_blob(&blob);
        if let Err(e) = self.records.update(&record).await {
            self.discard_blob(&blob.uri).await;
            return Err(e);
        }
        self.discard_blob(&old_uri).await;

        info!(id = id, from = %old_uri, to = %record.uri, "File relocated");
        Ok(record)
    }

    /// Delete temporary records older than the retention window
    ///
    /// Records that are still attached somewhere are left alone.
    #[instrument(skip(self))]
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> FileResult<usize> {
        let max_age = self.retention();
        let candidates = self.records.list_temporary().await?;
        let mut deleted = 0;

        for candidate in candidates {
            if !candidate.is_collectable(now, max_age) {
                continue;
            }

            let _lock = self.record_locks.lock(candidate.id).await;
            // Re-read under the lock; status may have flipped meanwhile
            let Some(record) = self.records.get(candidate.id).await? else {
                continue;
            };
            if !record.is_collectable(now, max_age) {
                continue;
            }

            let references = self.attachments.count_for_file(record.id).await?;
            if references > 0 {
                debug!(id = record.id, references = references, "Skipping attached temporary file");
                continue;
            }

            match self.purge(&record).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(id = record.id, error = %e, "Failed to collect temporary file"),
            }
        }

        info!(count = deleted, "Temporary files collected");
        Ok(deleted)
    }

    /// Age after which a temporary record may be collected
    fn retention(&self) -> chrono::Duration {
        let seconds = self.settings.temporary_max_age_seconds;
        chrono::Duration::from_std(std::time::Duration::from_secs(seconds)).unwrap_or_else(|_| {
            warn!(
                temporary_max_age_seconds = seconds,
                "Retention window out of range, using 6 hours"
            );
            chrono::Duration::hours(6)
        })
    }

    /// Create or update a record for a blob that was just written
    ///
    /// An existing record is re-read under its lock so edits that landed
    /// while the blob was being written survive. The blob is removed again if
    /// the record cannot be persisted.
    pub(crate) async fn ingest(
        &self,
        existing: Option<Id>,
        filename: String,
        status: Option<FileStatus>,
        blob: StoredBlob,
    ) -> FileResult<FileRecord> {
        let Some(id) = existing else {
            let new = NewFileRecord::from_blob(filename, &blob).with_status(status.unwrap_or_default());
            return match self.records.create(new).await {
                Ok(record) => {
                    info!(id = record.id, uri = %record.uri, "File record created");
                    Ok(record)
                }
                Err(e) => {
                    self.discard_blob(&blob.uri).await;
                    Err(e)
                }
            };
        };

        let _lock = self.record_locks.lock(id).await;
        let mut record = match self.get(id).await {
            Ok(record) => record,
            Err(e) => {
                self.discard_blob(&blob.uri).await;
                return Err(e);
            }
        };
        let previous_uri = record.uri.clone();

        record.apply_blob(&blob);
        record.filemime = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        record.filename = filename;
        if let Some(status) = status {
            record.status = status;
        }

        if let Err(e) = self.records.update(&record).await {
            self.discard_blob(&blob.uri).await;
            return Err(e);
        }
        if previous_uri != record.uri {
            self.discard_blob(&previous_uri).await;
        }

        info!(id = record.id, uri = %record.uri, "File record content replaced");
        Ok(record)
    }

    /// Hold the locks of several records at once
    ///
    /// Locks are taken in ascending id order so callers that hold more than
    /// one never deadlock each other.
    pub(crate) async fn lock_records(&self, ids: impl IntoIterator<Item = Id>) -> Vec<KeyedGuard<'_>> {
        let ids: BTreeSet<Id> = ids.into_iter().collect();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.record_locks.lock(id).await);
        }
        guards
    }

    /// Remove blob then record
    async fn purge(&self, record: &FileRecord) -> FileResult<()> {
        self.blobs.delete(&record.uri).await?;
        self.records.delete(record.id).await
    }

    async fn discard_blob(&self, uri: &str) {
        if let Err(e) = self.blobs.delete(uri).await {
            warn!(uri = %uri, error = %e, "Failed to remove blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::MemoryAttachmentStore;
    use crate::model::Attachment;
    use crate::storage::MemoryStorage;

    type Manager = FileRecordManager<MemoryFileRecordStore, MemoryAttachmentStore, MemoryStorage>;

    fn create_manager(policy: DeletePolicy) -> Manager {
        let settings = FileSettings {
            delete_policy: policy,
            ..FileSettings::default()
        };
        FileRecordManager::new(
            Arc::new(MemoryFileRecordStore::new()),
            Arc::new(MemoryAttachmentStore::new()),
            Arc::new(MemoryStorage::new()),
            settings,
        )
    }

    async fn attach(manager: &Manager, parent_id: Id, file_id: Id) {
        let mut list = manager.attachments().list_for_parent(parent_id).await.unwrap();
        list.push(Attachment::new(parent_id, file_id, 0));
        manager
            .attachments()
            .replace_for_parent(parent_id, list)
            .await
            .unwrap();
    }

    struct DenyDeletes;

    impl AccessPolicy for DenyDeletes {
        fn authorize(&self, operation: Operation, _target: Id) -> bool {
            operation != Operation::Delete
        }
    }

    #[tokio::test]
    async fn test_upload_creates_temporary_record() {
        let manager = create_manager(DeletePolicy::Cascade);

        let record = manager
            .upload("notes.txt", Bytes::from("Hello, World!"))
            .await
            .unwrap();

        assert_eq!(record.filename, "notes.txt");
        assert_eq!(record.status, FileStatus::Temporary);
        assert_eq!(record.filesize, 13);
        assert_eq!(record.filemime, "text/plain");
        assert!(record.uri.starts_with("public://"));
        assert!(manager.blobs().exists(&record.uri).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_requires_blob() {
        let manager = create_manager(DeletePolicy::Cascade);

        let result = manager.create("ghost.txt", "public://ghost.txt").await;
        assert!(matches!(result, Err(FileError::BlobUnreadable { .. })));

        manager
            .blobs()
            .put("public://real.txt", Bytes::from("real"), WriteMode::Rename)
            .await
            .unwrap();
        let record = manager.create("real.txt", "public://real.txt").await.unwrap();
        assert_eq!(record.uri, "public://real.txt");
        assert_eq!(record.filesize, 4);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let manager = create_manager(DeletePolicy::Cascade);
        assert!(matches!(manager.get(99).await, Err(FileError::NotFound(99))));
    }

    #[tokio::test]
    async fn test_save_edits_metadata_but_not_uri() {
        let manager = create_manager(DeletePolicy::Cascade);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();

        let mut edited = record.clone();
        edited.filename = "renamed.txt".to_string();
        edited.filesize = 1_000_000;
        let saved = manager.save(edited).await.unwrap();
        assert_eq!(saved.filename, "renamed.txt");
        assert_eq!(saved.filesize, 3);

        let mut moved = saved.clone();
        moved.uri = "public://elsewhere.txt".to_string();
        let result = manager.save(moved).await;
        assert!(matches!(result, Err(FileError::UriImmutable(_))));
        assert_eq!(manager.get(record.id).await.unwrap().uri, record.uri);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_attachments() {
        let manager = create_manager(DeletePolicy::Cascade);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();
        let other = manager.upload("b.txt", Bytes::from("def")).await.unwrap();
        attach(&manager, 10, record.id).await;
        attach(&manager, 10, other.id).await;
        attach(&manager, 20, record.id).await;

        manager.delete(record.id).await.unwrap();

        assert_eq!(manager.attachments().count_for_file(record.id).await.unwrap(), 0);
        assert_eq!(manager.attachments().count_for_file(other.id).await.unwrap(), 1);
        assert!(!manager.blobs().exists(&record.uri).await.unwrap());
        assert!(matches!(manager.get(record.id).await, Err(FileError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_rejected_when_referenced() {
        let manager = create_manager(DeletePolicy::Reject);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();
        attach(&manager, 10, record.id).await;

        let result = manager.delete(record.id).await;
        assert!(matches!(
            result,
            Err(FileError::ReferencedByAttachment { count: 1, .. })
        ));

        // Nothing changed
        assert_eq!(manager.attachments().count_for_file(record.id).await.unwrap(), 1);
        assert!(manager.blobs().exists(&record.uri).await.unwrap());
        assert!(manager.get(record.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_unreferenced_with_reject_policy() {
        let manager = create_manager(DeletePolicy::Reject);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();

        manager.delete(record.id).await.unwrap();
        assert!(manager.blobs().is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let manager = create_manager(DeletePolicy::Cascade);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();

        manager.delete(record.id).await.unwrap();
        manager.delete(record.id).await.unwrap();
        manager.delete(12345).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_denied_by_policy() {
        let manager = create_manager(DeletePolicy::Cascade).with_policy(Arc::new(DenyDeletes));
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();

        let result = manager.delete(record.id).await;
        assert!(matches!(result, Err(FileError::Forbidden(_))));
        assert!(manager.get(record.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let store = Arc::new(MemoryFileRecordStore::new());
        let settings = FileSettings {
            max_file_size: 4,
            ..FileSettings::default()
        };
        let manager = FileRecordManager::new(
            store,
            Arc::new(MemoryAttachmentStore::new()),
            Arc::new(MemoryStorage::new()),
            settings,
        );

        let result = manager.upload("big.txt", Bytes::from("more than four")).await;
        assert!(matches!(result, Err(FileError::FileTooLarge { size: 14, max: 4 })));
        assert!(manager.blobs().is_empty().await);
    }

    #[tokio::test]
    async fn test_relocate_moves_blob() {
        let manager = create_manager(DeletePolicy::Cascade);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();

        let moved = manager.relocate(record.id, "public://archive/a.txt").await.unwrap();

        assert_eq!(moved.uri, "public://archive/a.txt");
        assert!(!manager.blobs().exists(&record.uri).await.unwrap());
        let (_, data) = manager.read(record.id).await.unwrap();
        assert_eq!(data, Bytes::from("abc"));
    }

    #[tokio::test]
    async fn test_set_status() {
        let manager = create_manager(DeletePolicy::Cascade);
        let record = manager.upload("a.txt", Bytes::from("abc")).await.unwrap();

        let updated = manager.set_status(record.id, FileStatus::Permanent).await.unwrap();
        assert!(updated.is_permanent());
        assert!(manager.get(record.id).await.unwrap().is_permanent());

        let result = manager.set_status(404, FileStatus::Permanent).await;
        assert!(matches!(result, Err(FileError::NotFound(404))));
    }

    #[tokio::test]
    async fn test_out_of_range_retention_falls_back() {
        let settings = FileSettings {
            temporary_max_age_seconds: u64::MAX,
            ..FileSettings::default()
        };
        let manager = FileRecordManager::new(
            Arc::new(MemoryFileRecordStore::new()),
            Arc::new(MemoryAttachmentStore::new()),
            Arc::new(MemoryStorage::new()),
            settings,
        );
        assert_eq!(manager.retention(), chrono::Duration::hours(6));

        let stale = manager.upload("stale.txt", Bytes::from("1")).await.unwrap();
        assert_eq!(manager.collect_garbage(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::hours(7);
        assert_eq!(manager.collect_garbage(later).await.unwrap(), 1);
        assert!(matches!(manager.get(stale.id).await, Err(FileError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_collect_garbage() {
        let manager = create_manager(DeletePolicy::Cascade);
        let stale = manager.upload("stale.txt", Bytes::from("1")).await.unwrap();
        let kept = manager.upload("kept.txt", Bytes::from("2")).await.unwrap();
        let attached = manager.upload("attached.txt", Bytes::from("3")).await.unwrap();
        manager.set_status(kept.id, FileStatus::Permanent).await.unwrap();
        attach(&manager, 1, attached.id).await;

        // Nothing is old enough yet
        assert_eq!(manager.collect_garbage(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::hours(7);
        assert_eq!(manager.collect_garbage(later).await.unwrap(), 1);

        assert!(matches!(manager.get(stale.id).await, Err(FileError::NotFound(_))));
        assert!(!manager.blobs().exists(&stale.uri).await.unwrap());
        assert!(manager.get(kept.id).await.is_ok());
        assert!(manager.get(attached.id).await.is_ok());
    }
}

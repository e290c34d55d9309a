//! Bulk Status Operator

use std::sync::Arc;

use fe_core::Id;
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::attachments::AttachmentStore;
use crate::error::FileResult;
use crate::model::{FileRecord, FileStatus};
use crate::records::{FileRecordManager, FileRecordStore};
use crate::storage::BlobStore;

/// Result for one id of a bulk request
#[derive(Debug)]
pub struct StatusOutcome {
    pub id: Id,
    pub result: FileResult<FileRecord>,
}

/// Per-id outcomes, in request order
#[derive(Debug, Default)]
pub struct BulkReport {
    pub outcomes: Vec<StatusOutcome>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Applies a status to many records, isolating failures per record
pub struct BulkStatusOperator<R: FileRecordStore, A: AttachmentStore, B: BlobStore> {
    files: Arc<FileRecordManager<R, A, B>>,
}

impl<R: FileRecordStore, A: AttachmentStore, B: BlobStore> BulkStatusOperator<R, A, B> {
    pub fn new(files: Arc<FileRecordManager<R, A, B>>) -> Self {
        Self { files }
    }

    /// Set `status` on every id
    ///
    /// Records are updated concurrently; updates to the same id are
    /// serialized by the manager's record lock.
    #[instrument(skip(self, ids), fields(count = ids.len(), status = %status))]
    pub async fn set_status(&self, ids: &[Id], status: FileStatus) -> BulkReport {
        let outcomes = join_all(ids.iter().map(|&id| async move {
            let result = self.files.set_status(id, status).await;
            if let Err(e) = &result {
                warn!(id = id, error = %e, "Status change failed");
            }
            StatusOutcome { id, result }
        }))
        .await;

        let report = BulkReport { outcomes };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Bulk status change finished"
        );
        report
    }

    pub async fn set_permanent(&self, id: Id) -> FileResult<FileRecord> {
        self.files.set_status(id, FileStatus::Permanent).await
    }

    pub async fn set_temporary(&self, id: Id) -> FileResult<FileRecord> {
        self.files.set_status(id, FileStatus::Temporary).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::MemoryAttachmentStore;
    use crate::error::FileError;
    use crate::policy::{AccessPolicy, Operation};
    use crate::records::MemoryFileRecordStore;
    use crate::storage::MemoryStorage;
    use bytes::Bytes;
    use fe_core::config::FileSettings;

    type Files = FileRecordManager<MemoryFileRecordStore, MemoryAttachmentStore, MemoryStorage>;

    fn create_files() -> Files {
        FileRecordManager::new(
            Arc::new(MemoryFileRecordStore::new()),
            Arc::new(MemoryAttachmentStore::new()),
            Arc::new(MemoryStorage::new()),
            FileSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_id_does_not_abort_batch() {
        let files = Arc::new(create_files());
        let a = files.upload("a.txt", Bytes::from("a")).await.unwrap().id;
        let b = files.upload("b.txt", Bytes::from("b")).await.unwrap().id;
        let operator = BulkStatusOperator::new(files.clone());

        let report = operator.set_status(&[a, 999, b], FileStatus::Permanent).await;

        let ids: Vec<Id> = report.outcomes.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![a, 999, b]);
        assert!(report.outcomes[0].result.is_ok());
        assert!(matches!(report.outcomes[1].result, Err(FileError::NotFound(999))));
        assert!(report.outcomes[2].result.is_ok());
        assert_eq!(report.succeeded(), 2);
        assert!(!report.is_complete_success());

        assert!(files.get(a).await.unwrap().is_permanent());
        assert!(files.get(b).await.unwrap().is_permanent());
    }

    #[tokio::test]
    async fn test_forbidden_record_is_isolated() {
        struct Locked(Id);
        impl AccessPolicy for Locked {
            fn authorize(&self, operation: Operation, target: Id) -> bool {
                !(operation == Operation::SetStatus && target == self.0)
            }
        }

        let files = create_files();
        let a = files.upload("a.txt", Bytes::from("a")).await.unwrap().id;
        let b = files.upload("b.txt", Bytes::from("b")).await.unwrap().id;
        let files = Arc::new(files.with_policy(Arc::new(Locked(a))));
        let operator = BulkStatusOperator::new(files.clone());

        let report = operator.set_status(&[a, b], FileStatus::Permanent).await;

        assert!(matches!(report.outcomes[0].result, Err(FileError::Forbidden(_))));
        assert!(report.outcomes[1].result.is_ok());
        assert!(!files.get(a).await.unwrap().is_permanent());
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_each_applied() {
        let files = Arc::new(create_files());
        let a = files.upload("a.txt", Bytes::from("a")).await.unwrap().id;
        let operator = BulkStatusOperator::new(files.clone());

        let report = operator.set_status(&[a, a, a], FileStatus::Permanent).await;

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.is_complete_success());
        assert!(files.get(a).await.unwrap().is_permanent());
    }

    #[tokio::test]
    async fn test_single_record_shorthands() {
        let files = Arc::new(create_files());
        let a = files.upload("a.txt", Bytes::from("a")).await.unwrap().id;
        let operator = BulkStatusOperator::new(files);

        assert!(operator.set_permanent(a).await.unwrap().is_permanent());
        assert!(!operator.set_temporary(a).await.unwrap().is_permanent());
        assert!(matches!(operator.set_permanent(77).await, Err(FileError::NotFound(77))));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let operator = BulkStatusOperator::new(Arc::new(create_files()));
        let report = operator.set_status(&[], FileStatus::Temporary).await;
        assert!(report.outcomes.is_empty());
        assert!(report.is_complete_success());
    }
}

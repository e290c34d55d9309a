//! # fe-files
//!
//! File records and their attachments for File Entity RS.
//!
//! ## Features
//!
//! - Blob storage abstraction (local filesystem, in-memory) with atomic writes
//! - File record lifecycle (temporary/permanent, garbage collection, delete policy)
//! - Transfer codec for inline base64 or remote-URL file payloads
//! - Bulk status changes with per-record failure isolation
//! - Ordered attachment lists with weight-based reconciliation
//!
//! ## Example
//!
//! ```rust,ignore
//! use fe_files::{FileRecordManager, MemoryAttachmentStore, MemoryFileRecordStore, MemoryStorage};
//! use std::sync::Arc;
//!
//! let files = Arc::new(FileRecordManager::new(
//!     Arc::new(MemoryFileRecordStore::new()),
//!     Arc::new(MemoryAttachmentStore::new()),
//!     Arc::new(MemoryStorage::new()),
//!     Default::default(),
//! ));
//!
//! let record = files.upload("report.pdf", bytes::Bytes::from(data)).await?;
//! ```

pub mod attachments;
pub mod bulk;
pub mod codec;
pub mod error;
mod locks;
pub mod model;
pub mod policy;
pub mod reconcile;
pub mod records;
pub mod storage;

pub use attachments::{AttachmentListService, AttachmentStore, MemoryAttachmentStore};
pub use bulk::{BulkReport, BulkStatusOperator, StatusOutcome};
pub use codec::{
    DataValue, Encoded, FetchError, FieldSelection, HttpFetcher, PayloadSource, RemoteFetcher,
    TransferCodec, TransferPayload,
};
pub use error::{FileError, FileResult};
pub use model::{Attachment, FieldKind, FileRecord, FileStatus, NewFileRecord, ParentRef};
pub use policy::{AccessPolicy, AllowAll, Operation};
pub use reconcile::{parse_target_ids, reconcile, Reconciliation, RowData, Submission};
pub use records::{FileRecordManager, FileRecordStore, MemoryFileRecordStore};
pub use storage::{
    generate_uri, BlobStore, FileMetadata, LocalStorage, MemoryStorage, StorageError,
    StorageResult, StoredBlob, WriteMode,
};

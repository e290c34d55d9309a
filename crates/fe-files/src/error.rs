//! File entity errors

use fe_core::{Id, OpError};
use thiserror::Error;

use crate::storage::StorageError;

/// Service errors
#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(Id),
    #[error("Blob unreadable at {uri}: {reason}")]
    BlobUnreadable { uri: String, reason: String },
    #[error("Remote fetch failed for {url}: {reason}")]
    RemoteFetchFailed { url: String, reason: String },
    #[error("Transfer payload corrupt: {0}")]
    PayloadCorrupt(String),
    #[error("Failed to write {uri}: {reason}")]
    StorageWriteFailed { uri: String, reason: String },
    #[error("File {id} is referenced by {count} attachment(s)")]
    ReferencedByAttachment { id: Id, count: usize },
    #[error("Unknown file id in submitted order: {0}")]
    UnknownFileId(Id),
    #[error("Description for file {file_id} exceeds {max} characters")]
    DescriptionTooLong { file_id: Id, max: usize },
    #[error("Invalid submitted order: {0}")]
    InvalidOrder(String),
    #[error("The uri of file {0} changes only through ingestion or relocation")]
    UriImmutable(Id),
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type FileResult<T> = Result<T, FileError>;

impl FileError {
    pub(crate) fn unreadable(uri: &str, err: impl std::fmt::Display) -> Self {
        FileError::BlobUnreadable {
            uri: uri.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn write_failed(uri: &str, err: impl std::fmt::Display) -> Self {
        FileError::StorageWriteFailed {
            uri: uri.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<FileError> for OpError {
    fn from(err: FileError) -> Self {
        let message = err.to_string();
        match err {
            FileError::NotFound(id) => OpError::not_found("File", id),
            FileError::UnknownFileId(_) | FileError::InvalidOrder(_) | FileError::PayloadCorrupt(_) => {
                OpError::BadRequest { message }
            }
            FileError::DescriptionTooLong { .. } => OpError::Unprocessable { message },
            FileError::UriImmutable(_) => OpError::Unprocessable { message },
            FileError::ReferencedByAttachment { .. } => OpError::Conflict { message },
            FileError::FileTooLarge { .. } => OpError::PayloadTooLarge { message },
            FileError::Forbidden(_) => OpError::Forbidden { message },
            FileError::RemoteFetchFailed { .. } => OpError::ExternalService {
                service: "remote file".to_string(),
                message,
            },
            FileError::BlobUnreadable { .. }
            | FileError::StorageWriteFailed { .. }
            | FileError::Storage(_) => OpError::Storage(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_error_mapping() {
        let op: OpError = FileError::NotFound(3).into();
        assert_eq!(op.status_code(), 404);

        let op: OpError = FileError::ReferencedByAttachment { id: 3, count: 2 }.into();
        assert_eq!(op.status_code(), 409);
        assert!(op.to_string().contains("2 attachment(s)"));

        let op: OpError = FileError::RemoteFetchFailed {
            url: "https://example.com/a.png".into(),
            reason: "timed out".into(),
        }
        .into();
        assert_eq!(op.status_code(), 502);

        let op: OpError = FileError::PayloadCorrupt("bad base64".into()).into();
        assert_eq!(op.status_code(), 400);
    }
}

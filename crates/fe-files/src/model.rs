//! File record and attachment models

use chrono::{DateTime, Utc};
use fe_core::Id;
use serde::{Deserialize, Serialize};

use crate::storage::StoredBlob;

/// Lifecycle status of a file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Eligible for garbage collection once the retention window has passed
    #[default]
    Temporary,
    Permanent,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored file and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Id,
    /// Location of the blob, e.g. `public://2024-05/report.pdf`
    pub uri: String,
    /// Display name
    pub filename: String,
    pub status: FileStatus,
    /// File size in bytes
    pub filesize: u64,
    /// MIME content type
    pub filemime: String,
    /// SHA256 digest
    pub digest: String,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_permanent(&self) -> bool {
        self.status == FileStatus::Permanent
    }

    pub fn set_permanent(&mut self) {
        self.status = FileStatus::Permanent;
    }

    pub fn set_temporary(&mut self) {
        self.status = FileStatus::Temporary;
    }

    /// Whether garbage collection may remove this record at `now`
    pub fn is_collectable(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        !self.is_permanent() && self.changed_at + max_age < now
    }

    /// Point this record at a freshly written blob
    pub(crate) fn apply_blob(&mut self, blob: &StoredBlob) {
        self.uri = blob.uri.clone();
        self.filesize = blob.metadata.size;
        self.filemime = blob.metadata.content_type.clone();
        self.digest = blob.metadata.digest.clone();
        self.changed_at = Utc::now();
    }
}

/// A file record that has not been assigned an id yet
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub uri: String,
    pub filename: String,
    pub status: FileStatus,
    pub filesize: u64,
    pub filemime: String,
    pub digest: String,
}

impl NewFileRecord {
    pub fn from_blob(filename: impl Into<String>, blob: &StoredBlob) -> Self {
        let filename = filename.into();
        Self {
            uri: blob.uri.clone(),
            filemime: mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string(),
            filename,
            status: FileStatus::Temporary,
            filesize: blob.metadata.size,
            digest: blob.metadata.digest.clone(),
        }
    }

    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = status;
        self
    }

    pub fn into_record(self, id: Id) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id,
            uri: self.uri,
            filename: self.filename,
            status: self.status,
            filesize: self.filesize,
            filemime: self.filemime,
            digest: self.digest,
            created_at: now,
            changed_at: now,
        }
    }
}

/// Kind of field an attachment list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    File,
    Image,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Image => "image",
        }
    }

    /// Only plain file fields carry descriptions
    pub fn allows_description(&self) -> bool {
        matches!(self, Self::File)
    }
}

/// The parent side of an attachment list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    pub parent_id: Id,
    pub field_kind: FieldKind,
}

impl ParentRef {
    pub fn new(parent_id: Id, field_kind: FieldKind) -> Self {
        Self {
            parent_id,
            field_kind,
        }
    }
}

/// Association between a parent record and a file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub parent_id: Id,
    pub file_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub weight: i32,
}

impl Attachment {
    pub fn new(parent_id: Id, file_id: Id, weight: i32) -> Self {
        Self {
            parent_id,
            file_id,
            description: None,
            weight,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

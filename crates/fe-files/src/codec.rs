//! Transfer Codec
//!
//! Converts file records to and from a portable payload whose `data` carries
//! either base64 bytes or a URL to fetch them from.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{Bytes, BytesMut};
use fe_core::Id;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::attachments::AttachmentStore;
use crate::error::{FileError, FileResult};
use crate::model::{FileRecord, FileStatus};
use crate::records::{FileRecordManager, FileRecordStore};
use crate::storage::{BlobStore, WriteMode};

const DATA_FIELD: &str = "data";

/// Which payload fields a caller asked for
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSelection {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl FieldSelection {
    /// Parse a comma-separated `fields` parameter; blank means everything
    pub fn parse(raw: Option<&str>) -> Self {
        let fields: BTreeSet<String> = raw
            .unwrap_or_default()
            .split(',')
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();

        if fields.is_empty() {
            Self::All
        } else {
            Self::Only(fields)
        }
    }

    pub fn includes(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(fields) => fields.contains(field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
    pub value: String,
}

/// Wire form of a file record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filemime: Option<String>,
}

/// Where decoded bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    Inline(String),
    Remote(Url),
}

impl TransferPayload {
    /// Payload carrying base64-encoded bytes
    pub fn inline(filename: impl Into<String>, data: &[u8]) -> Self {
        Self {
            data: vec![DataValue {
                value: STANDARD.encode(data),
            }],
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    /// Payload referencing bytes at a URL
    pub fn remote(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            data: vec![DataValue { value: url.into() }],
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    fn value(&self) -> Option<&str> {
        self.data
            .first()
            .map(|d| d.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Classify the data value
    pub fn source(&self) -> FileResult<PayloadSource> {
        let value = self
            .value()
            .ok_or_else(|| FileError::PayloadCorrupt("payload has no data".to_string()))?;

        if value.starts_with("http://") || value.starts_with("https://") {
            let url = Url::parse(value)
                .map_err(|e| FileError::PayloadCorrupt(format!("invalid URL: {}", e)))?;
            Ok(PayloadSource::Remote(url))
        } else {
            Ok(PayloadSource::Inline(value.to_string()))
        }
    }

    pub fn inline_data(&self) -> Option<&str> {
        match self.source() {
            Ok(PayloadSource::Inline(_)) => self.value(),
            _ => None,
        }
    }

    pub fn remote_url(&self) -> Option<Url> {
        match self.source() {
            Ok(PayloadSource::Remote(url)) => Some(url),
            _ => None,
        }
    }
}

/// Result of encoding a record
#[derive(Debug)]
pub struct Encoded {
    pub payload: TransferPayload,
    /// Set when the blob could not be read and `data` was left out
    pub omitted: Option<FileError>,
}

/// Why a remote fetch produced no bytes
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("remote file is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },
    #[error("{0}")]
    Failed(String),
}

/// Fetches remote bytes for decoding
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `url`, giving up once the body exceeds `max_size` bytes
    async fn fetch(&self, url: &Url, max_size: u64) -> Result<Bytes, FetchError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, max_size: u64) -> Result<Bytes, FetchError> {
        let failed = |e: reqwest::Error| FetchError::Failed(e.to_string());

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?;

        if let Some(size) = response.content_length() {
            if size > max_size {
                return Err(FetchError::TooLarge { size, max: max_size });
            }
        }

        // Content-Length may be absent or wrong; count what actually arrives
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(failed)? {
            append_limited(&mut body, &chunk, max_size)?;
        }

        Ok(body.freeze())
    }
}

fn append_limited(body: &mut BytesMut, chunk: &[u8], max_size: u64) -> Result<(), FetchError> {
    let size = (body.len() + chunk.len()) as u64;
    if size > max_size {
        return Err(FetchError::TooLarge { size, max: max_size });
    }
    body.extend_from_slice(chunk);
    Ok(())
}

/// Encodes and decodes transfer payloads
pub struct TransferCodec<R: FileRecordStore, A: AttachmentStore, B: BlobStore> {
    files: Arc<FileRecordManager<R, A, B>>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl<R: FileRecordStore, A: AttachmentStore, B: BlobStore> TransferCodec<R, A, B> {
    pub fn new(files: Arc<FileRecordManager<R, A, B>>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self { files, fetcher }
    }

    /// Encode a record, inlining its bytes when `data` is selected
    ///
    /// An unreadable blob does not fail the call; the payload goes out without
    /// `data` and the error is reported in `omitted`.
    #[instrument(skip(self, record, selection), fields(id = record.id))]
    pub async fn encode(&self, record: &FileRecord, selection: &FieldSelection) -> Encoded {
        let mut payload = TransferPayload {
            id: Some(record.id),
            uri: selection.includes("uri").then(|| record.uri.clone()),
            filename: selection.includes("filename").then(|| record.filename.clone()),
            status: selection.includes("status").then_some(record.status),
            filesize: selection.includes("filesize").then_some(record.filesize),
            filemime: selection.includes("filemime").then(|| record.filemime.clone()),
            ..TransferPayload::default()
        };

        if !selection.includes(DATA_FIELD) {
            return Encoded {
                payload,
                omitted: None,
            };
        }

        match self.files.blobs().get(&record.uri).await {
            Ok(bytes) => {
                payload.data.push(DataValue {
                    value: STANDARD.encode(&bytes),
                });
                Encoded {
                    payload,
                    omitted: None,
                }
            }
            Err(e) => {
                warn!(id = record.id, uri = %record.uri, error = %e, "Blob unreadable, data omitted");
                Encoded {
                    payload,
                    omitted: Some(FileError::unreadable(&record.uri, e)),
                }
            }
        }
    }

    /// Decode a payload into stored bytes and a file record
    ///
    /// A payload `id` names an existing record to update in place. The
    /// returned record's `uri` may differ from `target_uri` after a
    /// collision rename.
    #[instrument(skip(self, payload), fields(id = payload.id))]
    pub async fn decode(&self, payload: TransferPayload, target_uri: &str) -> FileResult<FileRecord> {
        let bytes = match payload.source()? {
            PayloadSource::Remote(url) => {
                debug!(url = %url, "Fetching remote file");
                self.fetcher
                    .fetch(&url, self.files.settings().max_file_size)
                    .await
                    .map_err(|e| match e {
                        FetchError::TooLarge { size, max } => FileError::FileTooLarge { size, max },
                        FetchError::Failed(reason) => FileError::RemoteFetchFailed {
                            url: url.to_string(),
                            reason,
                        },
                    })?
            }
            PayloadSource::Inline(value) => decode_base64(&value)?,
        };
        self.files.check_size(bytes.len() as u64)?;

        let existing = match payload.id {
            Some(id) => Some(self.files.get(id).await?),
            None => None,
        };
        let filename = payload
            .filename
            .or_else(|| existing.as_ref().map(|r| r.filename.clone()))
            .unwrap_or_else(|| basename(target_uri).to_string());

        let blobs = self.files.blobs();
        blobs
            .ensure_directory(target_uri)
            .await
            .map_err(|e| FileError::write_failed(target_uri, e))?;
        let blob = blobs
            .put(target_uri, bytes, WriteMode::Rename)
            .await
            .map_err(|e| FileError::write_failed(target_uri, e))?;

        self.files
            .ingest(payload.id, filename, payload.status, blob)
            .await
    }
}

fn decode_base64(value: &str) -> FileResult<Bytes> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map(Bytes::from)
        .map_err(|e| FileError::PayloadCorrupt(format!("invalid base64: {}", e)))
}

fn basename(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

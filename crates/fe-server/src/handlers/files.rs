//! File API handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use fe_core::Id;
use fe_files::storage::split_uri;
use fe_files::{generate_uri, BlobStore, FieldSelection, FileRecord, FileStatus, TransferPayload};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult, HalError};
use crate::state::AppState;

/// Set on encode responses whose `data` was left out
pub const OMITTED_DATA_HEADER: &str = "x-omitted-data";

#[derive(Debug, Serialize)]
pub struct FileResponse {
    #[serde(flatten)]
    pub record: FileRecord,
    pub download_url: String,
}

#[derive(Debug, Deserialize)]
pub struct FieldsQuery {
    pub fields: Option<String>,
}

/// Encode a file record
///
/// GET /api/files/:id?fields=filename,data
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<Id>,
    Query(query): Query<FieldsQuery>,
) -> ApiResult<impl IntoResponse> {
    let record = state.files.get(id).await?;
    let selection = FieldSelection::parse(query.fields.as_deref());
    let encoded = state.codec.encode(&record, &selection).await;

    let mut headers = HeaderMap::new();
    if encoded.omitted.is_some() {
        headers.insert(OMITTED_DATA_HEADER, HeaderValue::from_static("blob_unreadable"));
    }

    Ok((headers, Json(encoded.payload)))
}

/// Decode a transfer payload into a stored file
///
/// POST /api/files
///
/// The blob lands at the payload's `uri` when given, otherwise under a
/// generated dated key. A payload `id` updates that record instead.
pub async fn create_file(
    State(state): State<AppState>,
    Json(payload): Json<TransferPayload>,
) -> ApiResult<impl IntoResponse> {
    let blobs = state.files.blobs();
    let target = match &payload.uri {
        Some(uri) => {
            let (scheme, _) = split_uri(uri).map_err(|e| ApiError::bad_request(e.to_string()))?;
            if scheme != blobs.scheme() {
                return Err(ApiError::bad_request(format!(
                    "Unsupported scheme '{}', expected '{}'",
                    scheme,
                    blobs.scheme()
                )));
            }
            uri.clone()
        }
        None => generate_uri(
            blobs.scheme(),
            payload.filename.as_deref().unwrap_or("upload.bin"),
        ),
    };

    let updating = payload.id.is_some();
    let record = state.codec.decode(payload, &target).await?;
    info!(id = record.id, uri = %record.uri, "File stored via API");

    let status = if updating {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let download_url = state.files.blobs().url(&record.uri);
    Ok((
        status,
        Json(FileResponse {
            record,
            download_url,
        }),
    ))
}

/// Delete a file record, its blob, and (by policy) its attachments
///
/// DELETE /api/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.files.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub ids: Vec<Id>,
    pub status: FileStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HalError>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<StatusResult>,
}

/// Set the status of several files at once
///
/// POST /api/files/status
pub async fn set_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Json<StatusResponse> {
    let report = state.bulk.set_status(&request.ids, request.status).await;

    let succeeded = report.succeeded();
    let failed = report.failed();
    let results = report
        .outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(record) => StatusResult {
                id: outcome.id,
                status: Some(record.status),
                error: None,
            },
            Err(e) => StatusResult {
                id: outcome.id,
                status: None,
                error: Some(ApiError::from(e).document()),
            },
        })
        .collect();

    Json(StatusResponse {
        succeeded,
        failed,
        results,
    })
}

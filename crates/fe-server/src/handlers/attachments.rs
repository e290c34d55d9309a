//! Attachment list handlers

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Json,
};
use fe_core::Id;
use fe_files::{Attachment, FieldKind, ParentRef, RowData, Submission};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AttachmentList {
    pub parent_id: Id,
    pub elements: Vec<Attachment>,
}

/// GET /api/parents/:parent_id/attachments
pub async fn list_attachments(
    State(state): State<AppState>,
    Path(parent_id): Path<Id>,
) -> ApiResult<Json<AttachmentList>> {
    let elements = state.attachments.list(parent_id).await?;
    Ok(Json(AttachmentList {
        parent_id,
        elements,
    }))
}

/// Batch submission of a parent's full attachment list
///
/// Accepts either `order` or the legacy space-separated `target_id`.
#[derive(Debug, Deserialize)]
pub struct AttachmentListRequest {
    #[serde(default)]
    pub field_kind: FieldKind,
    pub order: Option<Vec<Id>>,
    pub target_id: Option<String>,
    #[serde(default)]
    pub current: HashMap<Id, RowData>,
}

impl AttachmentListRequest {
    fn into_submission(self) -> ApiResult<Submission> {
        match (self.order, self.target_id) {
            (Some(order), _) => Ok(Submission {
                order,
                rows: self.current,
            }),
            (None, Some(raw)) => Ok(Submission::from_form(&raw, self.current)?),
            (None, None) => Err(ApiError::bad_request("Either order or target_id is required")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub parent_id: Id,
    pub elements: Vec<Attachment>,
    pub removed: Vec<Id>,
}

/// PUT /api/parents/:parent_id/attachments
pub async fn replace_attachments(
    State(state): State<AppState>,
    Path(parent_id): Path<Id>,
    Json(request): Json<AttachmentListRequest>,
) -> ApiResult<Json<ReconcileResponse>> {
    let parent = ParentRef::new(parent_id, request.field_kind);
    let submission = request.into_submission()?;

    let result = state.attachments.apply(parent, &submission).await?;

    Ok(Json(ReconcileResponse {
        parent_id,
        elements: result.attachments,
        removed: result.removed,
    }))
}

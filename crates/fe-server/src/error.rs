//! API error handling
//!
//! Renders every failure as a HAL+JSON error document.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fe_core::OpError;
use fe_files::FileError;
use serde::Serialize;

/// Error returned by HTTP handlers
#[derive(Debug)]
pub struct ApiError(pub OpError);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(OpError::BadRequest {
            message: msg.into(),
        })
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn error_identifier(&self) -> &'static str {
        match &self.0 {
            OpError::NotFound { .. } => "urn:file-entity:api:errors:NotFound",
            OpError::Forbidden { .. } => "urn:file-entity:api:errors:MissingPermission",
            OpError::BadRequest { .. } => "urn:file-entity:api:errors:InvalidRequestBody",
            OpError::Unprocessable { .. } => "urn:file-entity:api:errors:PropertyConstraintViolation",
            OpError::Conflict { .. } => "urn:file-entity:api:errors:UpdateConflict",
            OpError::PayloadTooLarge { .. } => "urn:file-entity:api:errors:PayloadTooLarge",
            OpError::ExternalService { .. } => "urn:file-entity:api:errors:RemoteFetchFailed",
            OpError::Storage(_) | OpError::Internal(_) | OpError::Config(_) => {
                "urn:file-entity:api:errors:InternalError"
            }
        }
    }

    pub(crate) fn document(&self) -> HalError {
        HalError {
            type_name: "Error".into(),
            error_identifier: self.error_identifier().into(),
            message: self.0.to_string(),
        }
    }
}

impl From<OpError> for ApiError {
    fn from(err: OpError) -> Self {
        ApiError(err)
    }
}

impl From<FileError> for ApiError {
    fn from(err: FileError) -> Self {
        ApiError(err.into())
    }
}

#[derive(Debug, Serialize)]
pub struct HalError {
    #[serde(rename = "_type")]
    type_name: String,
    #[serde(rename = "errorIdentifier")]
    error_identifier: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(self.document())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_errors_map_to_status() {
        let err: ApiError = FileError::NotFound(4).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_identifier(), "urn:file-entity:api:errors:NotFound");

        let err: ApiError = FileError::UriImmutable(4).into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let err: ApiError = FileError::FileTooLarge { size: 10, max: 1 }.into();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_document_shape() {
        let doc = serde_json::to_value(ApiError::bad_request("no data").document()).unwrap();
        assert_eq!(doc["_type"], "Error");
        assert_eq!(doc["errorIdentifier"], "urn:file-entity:api:errors:InvalidRequestBody");
        assert_eq!(doc["message"], "Bad request: no data");
    }
}

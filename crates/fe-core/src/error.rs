//! Core error type for File Entity RS
//!
//! Every crate-level error converts into `OpError` at the HTTP boundary.

use thiserror::Error;

/// Core error type for all file entity operations
#[derive(Error, Debug)]
pub enum OpError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Unprocessable: {message}")]
    Unprocessable { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// HTTP status code mapping for errors
impl OpError {
    pub fn status_code(&self) -> u16 {
        match self {
            OpError::NotFound { .. } => 404,
            OpError::Forbidden { .. } => 403,
            OpError::BadRequest { .. } => 400,
            OpError::Unprocessable { .. } => 422,
            OpError::Conflict { .. } => 409,
            OpError::PayloadTooLarge { .. } => 413,
            OpError::ExternalService { .. } => 502,
            OpError::Storage(_) | OpError::Internal(_) | OpError::Config(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            OpError::NotFound { .. } => "not_found",
            OpError::Forbidden { .. } => "forbidden",
            OpError::BadRequest { .. } => "bad_request",
            OpError::Unprocessable { .. } => "unprocessable",
            OpError::Conflict { .. } => "conflict",
            OpError::PayloadTooLarge { .. } => "payload_too_large",
            OpError::ExternalService { .. } => "external_service_error",
            OpError::Storage(_) => "storage_error",
            OpError::Internal(_) => "internal_error",
            OpError::Config(_) => "configuration_error",
        }
    }

    pub fn not_found(entity: &'static str, value: impl std::fmt::Display) -> Self {
        OpError::NotFound {
            entity,
            field: "id",
            value: value.to_string(),
        }
    }
}

/// Standard Result type for file entity operations
pub type OpResult<T> = Result<T, OpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OpError::not_found("File", 7).status_code(), 404);
        assert_eq!(
            OpError::Conflict {
                message: "still attached".into()
            }
            .status_code(),
            409
        );
        assert_eq!(OpError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_not_found_message() {
        let err = OpError::not_found("File", 42);
        assert_eq!(err.to_string(), "Not found: File with id=42");
        assert_eq!(err.error_code(), "not_found");
    }
}

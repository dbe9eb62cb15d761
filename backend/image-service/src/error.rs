/// Error types for Image Service
///
/// `AppError` covers the synchronous request path and is converted into an
/// HTTP response. `IngestError` covers the background pipeline, whose
/// failures are only logged and counted because the upload response has
/// already been sent by the time they happen.
use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use serde::Serialize;
use std::io;
use std::time::Duration;

/// Result type for image-service request handling
pub type Result<T> = std::result::Result<T, AppError>;

/// Body used for every not-found answer, kept byte-compatible with existing clients
pub const NOT_FOUND_MESSAGE: &str = "No Image Found";

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or missing request input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Content type we cannot decode
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: {0} bytes allowed")]
    PayloadTooLarge(usize),

    /// Identifier or variant does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identifier is still being ingested
    #[error("Conflict: {message}")]
    Conflict { message: String, retry_after: u64 },

    /// Filesystem failure on the request path
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body for 4xx/5xx answers other than not-found
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// `{"Message": "..."}` body used by the retrieval and deletion endpoints
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    #[serde(rename = "Message")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        match self {
            AppError::NotFound(_) => {
                HttpResponse::build(status).json(MessageResponse::new(NOT_FOUND_MESSAGE))
            }
            _ => {
                let error_type = match self {
                    AppError::BadRequest(_)
                    | AppError::UnsupportedMediaType(_)
                    | AppError::PayloadTooLarge(_) => "validation_error",
                    AppError::Conflict { .. } => "conflict_error",
                    _ => "server_error",
                };

                // Storage details stay in the logs, not in the response body
                let message = match self {
                    AppError::Storage(_) => "Storage failure".to_string(),
                    other => other.to_string(),
                };

                let mut builder = HttpResponse::build(status);
                if let AppError::Conflict { retry_after, .. } = self {
                    builder.insert_header((header::RETRY_AFTER, retry_after.to_string()));
                }

                builder.json(ErrorResponse {
                    error: status
                        .canonical_reason()
                        .unwrap_or("Error")
                        .to_string(),
                    message,
                    status: status.as_u16(),
                    error_type: error_type.to_string(),
                })
            }
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart payload: {err}"))
    }
}

/// Failures inside one background ingestion run
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to encode variant: {0}")]
    Encode(String),

    #[error("storage failure during {step}: {source}")]
    Storage {
        step: String,
        #[source]
        source: io::Error,
    },

    #[error("no decoder for content type {0:?}")]
    UnsupportedFormat(String),

    #[error("invalid target dimensions: {0}")]
    Dimensions(String),

    #[error("blocking task failed: {0}")]
    TaskFailed(String),

    #[error("ingestion timed out after {0:?}")]
    TimedOut(Duration),
}

impl IngestError {
    pub fn storage(step: impl Into<String>, source: io::Error) -> Self {
        IngestError::Storage {
            step: step.into(),
            source,
        }
    }
}

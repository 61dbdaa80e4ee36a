// src/errors.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageGenError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image synthesis error: {0}")]
    Synthesis(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation run was cancelled")]
    Cancelled,

    #[error("Generation run exceeded its deadline of {0}s")]
    Timeout(u64),
}

impl PageGenError {
    /// Short category name used as the `error` field of JSON error bodies.
    pub fn category(&self) -> &'static str {
        match self {
            PageGenError::Storage(_) => "Database error",
            PageGenError::Synthesis(_) => "AI service error",
            PageGenError::ImageProcessing(_) => "Image processing error",
            PageGenError::Serialization(_) => "Data processing error",
            PageGenError::Validation(_) => "Validation error",
            PageGenError::InvalidProvider(_) => "Invalid provider",
            PageGenError::NotFound(_) => "Not found",
            PageGenError::Config(_) => "Configuration error",
            PageGenError::Cancelled => "Cancelled",
            PageGenError::Timeout(_) => "Timeout",
        }
    }
}

impl ResponseError for PageGenError {
    fn status_code(&self) -> StatusCode {
        match self {
            PageGenError::Storage(_) | PageGenError::Serialization(_) | PageGenError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PageGenError::Synthesis(_) => StatusCode::SERVICE_UNAVAILABLE,
            PageGenError::ImageProcessing(_)
            | PageGenError::Validation(_)
            | PageGenError::InvalidProvider(_) => StatusCode::BAD_REQUEST,
            PageGenError::NotFound(_) => StatusCode::NOT_FOUND,
            PageGenError::Cancelled => StatusCode::CONFLICT,
            PageGenError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.category(),
            "message": self.to_string()
        }))
    }
}

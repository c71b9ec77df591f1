use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Teaching pipeline failed")]
    Pipeline {
        stream_error: String,
        fallback_error: String,
    },

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Context(msg) => ApiError::Context(msg),
            PipelineError::Fallback {
                stream_error,
                fallback_error,
            } => ApiError::Pipeline {
                stream_error,
                fallback_error,
            },
            PipelineError::InvalidState(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

/// Which path produced a server error.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetails {
    stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_error: Option<String>,
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Context(msg) => {
                tracing::error!("Context error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not prepare the lesson context".to_string(),
                    Some(ErrorDetails {
                        stage: "context",
                        reason: Some(msg),
                        stream_error: None,
                        fallback_error: None,
                    }),
                )
            }
            ApiError::Pipeline {
                stream_error,
                fallback_error,
            } => {
                tracing::error!(
                    stream_error = %stream_error,
                    fallback_error = %fallback_error,
                    "Teaching pipeline failed on both paths"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to generate a teaching response".to_string(),
                    Some(ErrorDetails {
                        stage: "fallback",
                        reason: None,
                        stream_error: Some(stream_error),
                        fallback_error: Some(fallback_error),
                    }),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            error: error_message,
            code: status.as_u16(),
            details,
        });

        (status, body).into_response()
    }
}

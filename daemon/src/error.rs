use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Request-scoped failures of the generation API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Model is not loaded or still initializing.")]
    ModelNotReady,

    #[error("Invalid image data")]
    InvalidImage,

    #[error("{0}")]
    InvalidRequest(#[from] JsonRejection),

    #[error("Too many concurrent generation requests")]
    Busy,

    #[error("{0}")]
    Generation(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidImage => StatusCode::BAD_REQUEST,
            ApiError::InvalidRequest(rejection) => rejection.status(),
            ApiError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Generation(format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            detail: self.to_string(),
        });
        (status, body).into_response()
    }
}

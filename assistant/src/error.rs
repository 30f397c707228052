use std::convert::Infallible;

use thiserror::Error;
use tracing::error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

use crate::llm::LlmError;
use crate::rag::store::StoreError;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] StoreError),

    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => "validation_error",
            QueryError::Retrieval(_) => "retrieval_error",
            QueryError::Generation(LlmError::RateLimited { .. }) => "rate_limited",
            QueryError::Generation(LlmError::Timeout) => "generation_timeout",
            QueryError::Generation(_) => "generation_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            QueryError::Validation(_) => StatusCode::BAD_REQUEST,
            QueryError::Generation(LlmError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            QueryError::Retrieval(_) | QueryError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Query(err) => err.status(),
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Query(err) => err.code(),
            ApiError::RateLimitExceeded => "rate_limited",
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

pub fn error_reply(status: StatusCode, code: &str, details: String) -> warp::reply::Response {
    let message = status.canonical_reason().unwrap_or("Error");
    let json = warp::reply::json(&serde_json::json!({
        "error": message,
        "code": code,
        "details": details,
    }));
    warp::reply::with_status(json, status).into_response()
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(api_err) = err.find::<ApiError>() {
        let status = api_err.status();
        if status.is_server_error() {
            error!(code = api_err.code(), "request failed: {}", api_err);
        }
        return Ok(error_reply(status, api_err.code(), api_err.to_string()));
    }

    let (status, code, details) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "validation_error", body_err.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "request body too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "validation_error", "content-length header required".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "validation_error", "expected application/json".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "method not allowed".to_string())
    } else {
        error!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "unhandled rejection".to_string())
    };

    Ok(error_reply(status, code, details))
}

//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use laurel_core::error::{ErrorCode, StoreError};
use laurel_engine::grant::EngineError;

/// An error returned by an API handler.
///
/// Expected business outcomes (duplicate, daily limit, capacity reached,
/// filtered) never become an `ApiError` — they are part of each handler's
/// response body.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unauthorized")]
  Unauthorized,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Map a backend error by its code: caller classes become 4xx,
  /// everything else is a 500.
  pub fn from_store<E: StoreError>(e: E) -> Self {
    match e.code() {
      ErrorCode::NotFound => Self::NotFound(e.to_string()),
      ErrorCode::InvalidArgument => Self::BadRequest(e.to_string()),
      _ => Self::Store(Box::new(e)),
    }
  }

  pub fn from_engine<E: StoreError>(e: EngineError<E>) -> Self {
    match e {
      EngineError::Invalid(m) => Self::BadRequest(m),
      EngineError::NotFound(m) => Self::NotFound(m),
      EngineError::Store(e) => Self::from_store(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::Unauthorized => {
        let mut res = (
          StatusCode::UNAUTHORIZED,
          Json(json!({ "error": "unauthorized" })),
        )
          .into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"laurel\""),
        );
        return res;
      }
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

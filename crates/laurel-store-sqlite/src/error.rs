//! Error type for `laurel-store-sqlite` and its [`ErrorCode`] mapping.

use laurel_core::error::{ErrorCode, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored discriminant string did not decode.
  #[error("decode error: {0}")]
  Decode(String),

  #[error("membership not found: {0}")]
  MembershipNotFound(String),

  #[error("pending reward not found: {0}")]
  PendingNotFound(uuid::Uuid),
}

impl StoreError for Error {
  fn code(&self) -> ErrorCode {
    match self {
      Error::Database(e) => database_code(e),
      Error::Json(_) | Error::Uuid(_) | Error::DateParse(_) | Error::Decode(_) => {
        ErrorCode::Internal
      }
      Error::MembershipNotFound(_) | Error::PendingNotFound(_) => ErrorCode::NotFound,
    }
  }
}

/// Map the SQLite error surface onto the shared code taxonomy. Busy and
/// locked are serialization conflicts worth a retry.
fn database_code(e: &tokio_rusqlite::Error) -> ErrorCode {
  match e {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, _)) => {
      match err.code {
        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
          ErrorCode::Aborted
        }
        rusqlite::ErrorCode::ConstraintViolation => ErrorCode::AlreadyExists,
        rusqlite::ErrorCode::DiskFull => ErrorCode::ResourceExhausted,
        rusqlite::ErrorCode::SystemIoFailure => ErrorCode::Unavailable,
        _ => ErrorCode::Internal,
      }
    }
    tokio_rusqlite::Error::ConnectionClosed => ErrorCode::Unavailable,
    _ => ErrorCode::Internal,
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error classification shared by all store backends.
//!
//! Backends surface their own error enums; the retry shell only ever looks
//! at the [`ErrorCode`] a backend assigns to an error. The code set follows
//! the document-store convention so classification stays stable across
//! backends.

use serde::{Deserialize, Serialize};

/// Coarse classification of a store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
  /// Caller passed something malformed. Never retried.
  InvalidArgument,
  /// The referenced document does not exist. Never retried.
  NotFound,
  /// A create-if-absent write hit an existing document.
  AlreadyExists,
  /// Quota or throughput limit hit; backs off and retries.
  ResourceExhausted,
  /// A stated precondition of the operation does not hold.
  FailedPrecondition,
  /// The transaction was aborted (serialization conflict); retryable.
  Aborted,
  /// The backend is (temporarily) unreachable; retryable.
  Unavailable,
  /// The operation ran out of time; retryable.
  DeadlineExceeded,
  /// The backend misbehaved in an unspecified way; retryable once.
  Internal,
  /// Anything that fits none of the above. Not retried.
  Unknown,
}

impl ErrorCode {
  /// Whether an error with this code is worth an immediate retry.
  pub fn is_transient(self) -> bool {
    matches!(
      self,
      Self::ResourceExhausted
        | Self::Aborted
        | Self::Unavailable
        | Self::DeadlineExceeded
        | Self::Internal
    )
  }

  /// Stable string form stored in `pending_rewards.error_code`.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::InvalidArgument => "invalid-argument",
      Self::NotFound => "not-found",
      Self::AlreadyExists => "already-exists",
      Self::ResourceExhausted => "resource-exhausted",
      Self::FailedPrecondition => "failed-precondition",
      Self::Aborted => "aborted",
      Self::Unavailable => "unavailable",
      Self::DeadlineExceeded => "deadline-exceeded",
      Self::Internal => "internal",
      Self::Unknown => "unknown",
    }
  }
}

impl std::fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Implemented by every store backend error so callers can classify
/// failures without knowing the backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn code(&self) -> ErrorCode;
}

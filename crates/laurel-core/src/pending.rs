//! Durable pending-reward records.
//!
//! A pending reward is created only when the retry shell gives up on a
//! grant. It captures enough context to replay the grant later and is
//! resolved — never deleted — by the reconciliation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
  Open,
  Resolved,
}

/// A reward that still has to be granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReward {
  pub pending_id:  Uuid,
  pub user_id:     UserId,
  pub action_key:  String,
  /// Free-form replay context: `context_id`, post id, community id, …
  pub metadata:    serde_json::Value,
  /// Message of the last error before giving up.
  pub error:       String,
  /// Stable code of the last error (see [`crate::error::ErrorCode`]).
  pub error_code:  String,
  pub created_at:  DateTime<Utc>,
  pub status:      PendingStatus,
  pub resolved_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::PendingStore::record`].
/// `pending_id` and `created_at` are set by the store.
#[derive(Debug, Clone)]
pub struct NewPendingReward {
  pub user_id:    UserId,
  pub action_key: String,
  pub metadata:   serde_json::Value,
  pub error:      String,
  pub error_code: String,
}

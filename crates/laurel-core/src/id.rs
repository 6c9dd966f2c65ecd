//! Identifier newtypes.
//!
//! User and program ids arrive from the upstream auth gateway as opaque
//! strings. Ledger entry ids are either deterministic — derived from the
//! logical action so a replay collides with the original write — or random
//! for free-form events that have no natural dedup key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── UserId ──────────────────────────────────────────────────────────────────

/// An opaque user id, as issued by the upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for UserId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for UserId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── ProgramId ───────────────────────────────────────────────────────────────

/// Identifies a capacity-limited program (e.g. a supporters group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(pub String);

impl ProgramId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for ProgramId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ProgramId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── EntryId ─────────────────────────────────────────────────────────────────

/// Primary key of a ledger entry.
///
/// The deterministic constructors are the sole idempotency mechanism: two
/// writes for the same logical action produce the same id, and the store's
/// create-if-absent append turns the second write into a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
  /// `{action}:{user}:{context}` — one grant per action per context.
  pub fn for_action(action_key: &str, user: &UserId, context_id: &str) -> Self {
    Self(format!("{action_key}:{user}:{context_id}"))
  }

  /// One grant per post, regardless of how often the write is replayed.
  pub fn for_post(user: &UserId, post_id: &str) -> Self {
    Self(format!("post:{user}:{post_id}"))
  }

  /// One payout per broadcast per recipient — re-running a partially
  /// failed broadcast cannot double-grant.
  pub fn for_broadcast(broadcast_id: &str, user: &UserId) -> Self {
    Self(format!("broadcast:{broadcast_id}:{user}"))
  }

  /// Random id for free-form events with no natural dedup key.
  pub fn random() -> Self { Self(Uuid::new_v4().hyphenated().to_string()) }

  /// A caller-supplied id (e.g. an order number used to dedup a spend).
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for EntryId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deterministic_ids_are_stable() {
    let user = UserId::from("u-1");
    let a = EntryId::for_action("comment.write", &user, "c-42");
    let b = EntryId::for_action("comment.write", &user, "c-42");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "comment.write:u-1:c-42");
  }

  #[test]
  fn different_context_different_id() {
    let user = UserId::from("u-1");
    let a = EntryId::for_action("comment.write", &user, "c-42");
    let b = EntryId::for_action("comment.write", &user, "c-43");
    assert_ne!(a, b);
  }

  #[test]
  fn random_ids_differ() {
    assert_ne!(EntryId::random(), EntryId::random());
  }
}

//! Delivery-side types and trait seams for the broadcast coordinator.
//!
//! The push transport itself is an external capability: it takes a
//! recipient set and a payload and reports per-recipient success. Token
//! resolution, platform APIs, and delivery receipts all live behind
//! [`PushGateway`].

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::id::UserId;

// ─── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
  /// Service announcements; always deliverable.
  Notice,
  /// Accompanies a point payout.
  Reward,
  /// Promotional content; requires marketing consent.
  Marketing,
}

/// A push payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub title: String,
  pub body:  String,
  pub kind:  MessageKind,
}

// ─── Delivery ────────────────────────────────────────────────────────────────

/// Per-recipient outcome of one gateway call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
  pub delivered: Vec<UserId>,
  pub failed:    Vec<UserId>,
}

/// The push-delivery capability.
///
/// Implementations must not fail wholesale: transport problems for
/// individual recipients are reported in [`DeliveryReport::failed`].
pub trait PushGateway: Send + Sync {
  fn deliver(
    &self,
    recipients: &[UserId],
    message:    &Message,
  ) -> impl Future<Output = DeliveryReport> + Send;
}

// ─── Eligibility ─────────────────────────────────────────────────────────────

/// Per-recipient predicate applied before any grant or delivery.
pub trait EligibilityFilter: Send + Sync {
  fn eligible(&self, user: &UserId) -> impl Future<Output = bool> + Send;
}

/// Filter that admits every recipient.
pub struct AllowAll;

impl EligibilityFilter for AllowAll {
  async fn eligible(&self, _user: &UserId) -> bool { true }
}

// ─── Broadcast report ────────────────────────────────────────────────────────

/// Why a recipient did not fully succeed. The three classes stay
/// distinguishable so an operator can re-run only the failed subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
  /// Dropped by the eligibility filter; nothing was attempted.
  Filtered,
  /// The reward grant failed; no delivery was attempted.
  RewardFailed,
  /// Reward (if any) succeeded but the push did not.
  DeliveryFailed,
}

/// Overall outcome written back to the initiating record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
  /// Every eligible recipient received both reward and delivery.
  Completed,
  /// Some but not all eligible recipients succeeded.
  Partial,
  /// No recipient succeeded.
  Failed,
}

/// Final tallies of one broadcast execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastReport {
  pub status:          BroadcastStatus,
  /// Recipients that received the reward (when one was attached) and the
  /// message.
  pub succeeded:       Vec<UserId>,
  pub filtered:        Vec<UserId>,
  pub reward_failed:   Vec<UserId>,
  pub delivery_failed: Vec<UserId>,
}

impl BroadcastReport {
  pub fn success_count(&self) -> usize { self.succeeded.len() }

  /// Delivery failures ∪ reward failures ∪ filtered-out.
  pub fn failure_count(&self) -> usize {
    self.filtered.len() + self.reward_failed.len() + self.delivery_failed.len()
  }
}

//! Program membership types.
//!
//! One membership per (program, user). Created by the admission controller
//! inside a transaction; its status is transitioned later by the operator
//! approval workflow. Memberships are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ProgramId, UserId};

/// Lifecycle status of a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
  Pending,
  Approved,
  Rejected,
}

/// A user's membership in one program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
  pub program_id:  ProgramId,
  pub user_id:     UserId,
  /// Unique within the program among non-rejected members.
  pub nickname:    String,
  pub status:      MemberStatus,
  pub joined_at:   DateTime<Utc>,
  pub approved_at: Option<DateTime<Utc>>,
  pub rejected_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::MembershipStore::apply`].
/// `joined_at` is set by the store; new memberships are always `pending`.
#[derive(Debug, Clone)]
pub struct NewMembership {
  pub user_id:  UserId,
  pub nickname: String,
}

/// Capacity configuration for a program, from the policy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramLimits {
  /// Maximum number of slot-holding (non-rejected) members.
  pub capacity:         u32,
  /// When false the program admits without a first-come cutoff.
  #[serde(default = "default_enforce")]
  pub enforce_capacity: bool,
}

fn default_enforce() -> bool { true }

//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings (lexicographically
//! comparable in SQL). Pending-reward metadata is stored as compact JSON.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use laurel_core::{
  id::{EntryId, ProgramId, UserId},
  ledger::{ChangeType, LedgerEntry},
  membership::{MemberStatus, Membership},
  pending::{PendingReward, PendingStatus},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── ChangeType ──────────────────────────────────────────────────────────────

pub fn encode_change_type(c: ChangeType) -> &'static str {
  match c {
    ChangeType::Add => "add",
    ChangeType::Deduct => "deduct",
  }
}

pub fn decode_change_type(s: &str) -> Result<ChangeType> {
  match s {
    "add" => Ok(ChangeType::Add),
    "deduct" => Ok(ChangeType::Deduct),
    other => Err(Error::Decode(format!("unknown change type: {other:?}"))),
  }
}

// ─── MemberStatus ────────────────────────────────────────────────────────────

pub fn encode_member_status(s: MemberStatus) -> &'static str {
  match s {
    MemberStatus::Pending => "pending",
    MemberStatus::Approved => "approved",
    MemberStatus::Rejected => "rejected",
  }
}

pub fn decode_member_status(s: &str) -> Result<MemberStatus> {
  match s {
    "pending" => Ok(MemberStatus::Pending),
    "approved" => Ok(MemberStatus::Approved),
    "rejected" => Ok(MemberStatus::Rejected),
    other => Err(Error::Decode(format!("unknown member status: {other:?}"))),
  }
}

// ─── PendingStatus ───────────────────────────────────────────────────────────

pub fn encode_pending_status(s: PendingStatus) -> &'static str {
  match s {
    PendingStatus::Open => "open",
    PendingStatus::Resolved => "resolved",
  }
}

pub fn decode_pending_status(s: &str) -> Result<PendingStatus> {
  match s {
    "open" => Ok(PendingStatus::Open),
    "resolved" => Ok(PendingStatus::Resolved),
    other => Err(Error::Decode(format!("unknown pending status: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `ledger_entries` row.
pub struct RawLedgerEntry {
  pub entry_id:    String,
  pub user_id:     String,
  pub amount:      i64,
  pub reason:      String,
  pub action_key:  Option<String>,
  pub change_type: String,
  pub created_at:  String,
  pub expires_at:  Option<String>,
  pub consumed_at: Option<String>,
}

impl RawLedgerEntry {
  pub fn into_entry(self) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
      entry_id:    EntryId::new(self.entry_id),
      user_id:     UserId::new(self.user_id),
      amount:      self.amount,
      reason:      self.reason,
      action_key:  self.action_key,
      change_type: decode_change_type(&self.change_type)?,
      created_at:  decode_dt(&self.created_at)?,
      expires_at:  self.expires_at.as_deref().map(decode_dt).transpose()?,
      consumed_at: self.consumed_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from a `memberships` row.
pub struct RawMembership {
  pub program_id:  String,
  pub user_id:     String,
  pub nickname:    String,
  pub status:      String,
  pub joined_at:   String,
  pub approved_at: Option<String>,
  pub rejected_at: Option<String>,
}

impl RawMembership {
  pub fn into_membership(self) -> Result<Membership> {
    Ok(Membership {
      program_id:  ProgramId::new(self.program_id),
      user_id:     UserId::new(self.user_id),
      nickname:    self.nickname,
      status:      decode_member_status(&self.status)?,
      joined_at:   decode_dt(&self.joined_at)?,
      approved_at: self.approved_at.as_deref().map(decode_dt).transpose()?,
      rejected_at: self.rejected_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from a `pending_rewards` row.
pub struct RawPendingReward {
  pub pending_id:  String,
  pub user_id:     String,
  pub action_key:  String,
  pub metadata:    String,
  pub error:       String,
  pub error_code:  String,
  pub created_at:  String,
  pub status:      String,
  pub resolved_at: Option<String>,
}

impl RawPendingReward {
  pub fn into_pending(self) -> Result<PendingReward> {
    Ok(PendingReward {
      pending_id:  Uuid::parse_str(&self.pending_id)?,
      user_id:     UserId::new(self.user_id),
      action_key:  self.action_key,
      metadata:    serde_json::from_str(&self.metadata)?,
      error:       self.error,
      error_code:  self.error_code,
      created_at:  decode_dt(&self.created_at)?,
      status:      decode_pending_status(&self.status)?,
      resolved_at: self.resolved_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

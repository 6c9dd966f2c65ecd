//! Ledger entry types — the fundamental unit of the point ledger.
//!
//! An entry is an immutable record of one balance change. Entries are never
//! updated or deleted; the single exception is the `consumed_at` stamp set
//! by the expiry sweep. Balances are derived by summing entries, never
//! stored.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EntryId, UserId};

// ─── ChangeType ──────────────────────────────────────────────────────────────

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
  /// A grant: `amount` is positive.
  Add,
  /// A deduction: `amount` is negative (or zero when clamped).
  Deduct,
}

// ─── LedgerEntry ─────────────────────────────────────────────────────────────

/// One immutable balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
  pub entry_id:    EntryId,
  pub user_id:     UserId,
  /// Signed: positive for grants, negative for deductions.
  pub amount:      i64,
  /// Human-readable reason shown in the user's point history.
  pub reason:      String,
  /// The action that produced this entry, if any (e.g. `"comment.write"`).
  pub action_key:  Option<String>,
  pub change_type: ChangeType,
  /// Server-assigned timestamp; never changes after creation.
  pub created_at:  DateTime<Utc>,
  /// Grants past this instant no longer count toward the balance.
  pub expires_at:  Option<DateTime<Utc>>,
  /// Stamped once by the expiry sweep; the only mutable field.
  pub consumed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
  /// Whether this entry still counts toward the active balance at `as_of`.
  ///
  /// Deductions always count — they record points already spent. A grant is
  /// active until it expires or is consumed.
  pub fn is_active(&self, as_of: DateTime<Utc>) -> bool {
    match self.change_type {
      ChangeType::Deduct => true,
      ChangeType::Add => {
        self.consumed_at.is_none()
          && self.expires_at.is_none_or(|exp| exp > as_of)
      }
    }
  }
}

// ─── NewEntry ────────────────────────────────────────────────────────────────

/// Input to the ledger append operations.
/// `created_at` is always set by the store; it is not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewEntry {
  pub entry_id:    EntryId,
  pub user_id:     UserId,
  pub amount:      i64,
  pub reason:      String,
  pub action_key:  Option<String>,
  pub change_type: ChangeType,
  pub expires_at:  Option<DateTime<Utc>>,
}

impl NewEntry {
  /// A grant of `amount` points for `action_key`.
  pub fn grant(
    entry_id:   EntryId,
    user_id:    UserId,
    amount:     i64,
    reason:     impl Into<String>,
    action_key: Option<String>,
    expires_at: Option<DateTime<Utc>>,
  ) -> Self {
    Self {
      entry_id,
      user_id,
      amount,
      reason: reason.into(),
      action_key,
      change_type: ChangeType::Add,
      expires_at,
    }
  }

  /// A deduction of `amount` points. The store clamps the amount to the
  /// user's active balance at append time; `amount` here is the requested
  /// (positive) figure.
  pub fn deduction(
    entry_id: EntryId,
    user_id:  UserId,
    amount:   i64,
    reason:   impl Into<String>,
  ) -> Self {
    Self {
      entry_id,
      user_id,
      amount: -amount,
      reason: reason.into(),
      action_key: None,
      change_type: ChangeType::Deduct,
      expires_at: None,
    }
  }
}

// ─── BalanceView ─────────────────────────────────────────────────────────────

/// The computed balance for a user — never stored, always derived from the
/// entries active as of `as_of`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
  pub user_id: UserId,
  pub as_of:   DateTime<Utc>,
  pub total:   i64,
}

// ─── Day key ─────────────────────────────────────────────────────────────────

/// The calendar-day key used by the per-action daily counter.
///
/// Day rollover is the only reset the counter ever gets: a new UTC day
/// produces a new key and the old rows simply stop being read.
pub fn day_key(at: DateTime<Utc>) -> String {
  day_key_of(at.date_naive())
}

pub fn day_key_of(day: NaiveDate) -> String {
  day.format("%Y-%m-%d").to_string()
}

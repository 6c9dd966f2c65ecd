//! The store traits and their outcome types.
//!
//! The traits are implemented by storage backends (e.g.
//! `laurel-store-sqlite`). Higher layers (`laurel-engine`, `laurel-api`)
//! depend on these abstractions, not on any concrete backend.
//!
//! Two operations are atomic units and must be implemented as single
//! transactions: [`LedgerStore::append_counted`] (cap check + entry insert +
//! counter increment) and [`MembershipStore::apply`] (the five-step
//! admission check). Everywhere else, idempotent create-if-absent keys
//! substitute for locking.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  error::StoreError,
  id::{EntryId, ProgramId, UserId},
  ledger::{BalanceView, LedgerEntry, NewEntry},
  membership::{MemberStatus, Membership, NewMembership, ProgramLimits},
  pending::{NewPendingReward, PendingReward},
};

// ─── Outcome types ───────────────────────────────────────────────────────────

/// Result of a plain create-if-absent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
  /// `false` means an entry with the same id already existed and nothing
  /// was written (idempotent replay).
  pub created: bool,
}

/// Result of an append that also maintains the daily counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountedAppend {
  /// Entry written, counter incremented.
  Created,
  /// Same id already present; no write, no counter increment.
  Duplicate,
  /// The per-day cap was already reached; no write.
  CapExceeded,
}

/// Result of an idempotent, balance-clamped deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeductionOutcome {
  /// Points actually removed (0 ≤ deducted ≤ requested).
  pub deducted:  i64,
  /// `true` when the deterministic id already existed; `deducted` is 0.
  pub duplicate: bool,
}

/// Result of the transactional admission check.
#[derive(Debug, Clone)]
pub enum AdmissionOutcome {
  Admitted(Membership),
  /// This user already has a membership in the program.
  DuplicateApplication,
  /// The nickname collides with a non-rejected member's.
  NicknameTaken,
  /// The first-come cutoff was reached before this application.
  CapacityReached,
}

// ─── LedgerStore ─────────────────────────────────────────────────────────────

/// The append-only point ledger.
///
/// All methods return `Send` futures so the traits can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait LedgerStore: Send + Sync {
  type Error: StoreError;

  /// Insert-if-absent by entry id. Must never modify an existing entry.
  fn append(
    &self,
    entry: NewEntry,
  ) -> impl Future<Output = Result<Appended, Self::Error>> + Send;

  /// Append a grant and bump the `(user, action, day)` counter in one
  /// transaction. `cap` of `None` means the counter is maintained but
  /// never limits. Duplicates must not touch the counter.
  fn append_counted(
    &self,
    entry: NewEntry,
    cap:   Option<u32>,
  ) -> impl Future<Output = Result<CountedAppend, Self::Error>> + Send;

  /// Append a deduction, clamped to the user's active balance inside the
  /// same transaction so the balance can never go negative. A duplicate id
  /// deducts 0. The clamped (possibly zero) entry is still written so the
  /// deterministic id is burned.
  fn append_deduction(
    &self,
    entry: NewEntry,
  ) -> impl Future<Output = Result<DeductionOutcome, Self::Error>> + Send;

  /// Fetch one entry by id. Returns `None` if not found.
  fn entry(
    &self,
    id: &EntryId,
  ) -> impl Future<Output = Result<Option<LedgerEntry>, Self::Error>> + Send;

  /// All entries for a user, newest first.
  fn entries_for_user(
    &self,
    user: &UserId,
  ) -> impl Future<Output = Result<Vec<LedgerEntry>, Self::Error>> + Send;

  /// Derived balance: sum of entries active as of `as_of` (defaults to
  /// now). Expiration is evaluated lazily — expired rows still exist.
  fn balance(
    &self,
    user:  &UserId,
    as_of: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<BalanceView, Self::Error>> + Send;

  /// Grants already issued for `(user, action_key)` on the given day key.
  fn daily_count(
    &self,
    user:       &UserId,
    action_key: &str,
    day:        &str,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send;

  /// Stamp `consumed_at` on grants whose `expires_at` has passed.
  /// Returns the number of entries stamped. Bookkeeping only — balances
  /// already exclude expired grants.
  fn sweep_expired(
    &self,
    user:  &UserId,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send;
}

// ─── MembershipStore ─────────────────────────────────────────────────────────

/// Membership set of capacity-limited programs.
pub trait MembershipStore: Send + Sync {
  type Error: StoreError;

  /// The five-step admission check as one atomic transaction:
  /// read the program's full membership set, reject duplicates, reject
  /// nickname collisions with non-rejected members, enforce the
  /// first-come capacity over non-rejected members (a pending
  /// application already holds its slot), then insert `pending`.
  fn apply(
    &self,
    program:     &ProgramId,
    application: NewMembership,
    limits:      &ProgramLimits,
  ) -> impl Future<Output = Result<AdmissionOutcome, Self::Error>> + Send;

  /// Fetch one membership. Returns `None` if the user never applied.
  fn membership(
    &self,
    program: &ProgramId,
    user:    &UserId,
  ) -> impl Future<Output = Result<Option<Membership>, Self::Error>> + Send;

  /// All memberships of a program, oldest application first.
  fn members(
    &self,
    program: &ProgramId,
  ) -> impl Future<Output = Result<Vec<Membership>, Self::Error>> + Send;

  /// Transition a membership's status (the approval workflow's write).
  /// Stamps `approved_at`/`rejected_at` as appropriate.
  fn set_status(
    &self,
    program: &ProgramId,
    user:    &UserId,
    status:  MemberStatus,
  ) -> impl Future<Output = Result<Membership, Self::Error>> + Send;
}

// ─── PendingStore ────────────────────────────────────────────────────────────

/// Durable queue of rewards that still have to be granted.
pub trait PendingStore: Send + Sync {
  type Error: StoreError;

  fn record(
    &self,
    pending: NewPendingReward,
  ) -> impl Future<Output = Result<PendingReward, Self::Error>> + Send;

  /// Open records, oldest first, at most `limit`.
  fn open(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<PendingReward>, Self::Error>> + Send;

  /// Mark one record resolved. Idempotent.
  fn resolve(
    &self,
    id: &Uuid,
  ) -> impl Future<Output = Result<PendingReward, Self::Error>> + Send;
}

// ─── ConsentStore ────────────────────────────────────────────────────────────

/// Marketing-consent flags backing the broadcast eligibility filter.
pub trait ConsentStore: Send + Sync {
  type Error: StoreError;

  fn set_marketing_consent(
    &self,
    user:    &UserId,
    granted: bool,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Unknown users have not consented.
  fn has_marketing_consent(
    &self,
    user: &UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

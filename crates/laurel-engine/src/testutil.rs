//! In-memory store double for engine unit tests.
//!
//! Mirrors the transactional semantics of the real backend: every
//! multi-step operation runs under one mutex guard, so interleavings seen
//! by tests match what a serialised transaction would produce. Failure
//! injection covers the retry-shell paths.

use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::Mutex,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use laurel_core::{
  error::{ErrorCode, StoreError},
  id::{EntryId, ProgramId, UserId},
  ledger::{BalanceView, ChangeType, LedgerEntry, NewEntry, day_key},
  membership::{MemberStatus, Membership, NewMembership, ProgramLimits},
  pending::{NewPendingReward, PendingReward, PendingStatus},
  store::{
    AdmissionOutcome, Appended, ConsentStore, CountedAppend, DeductionOutcome,
    LedgerStore, MembershipStore, PendingStore,
  },
};

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MemError {
  pub code:    ErrorCode,
  pub message: String,
}

impl MemError {
  fn not_found(what: impl Into<String>) -> Self {
    Self { code: ErrorCode::NotFound, message: what.into() }
  }
}

impl StoreError for MemError {
  fn code(&self) -> ErrorCode { self.code }
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
  entries:      Vec<LedgerEntry>,
  counters:     HashMap<(String, String, String), u32>,
  memberships:  Vec<Membership>,
  pending:      Vec<PendingReward>,
  consents:     HashMap<String, bool>,
  // Failure injection for append paths.
  append_fails: VecDeque<MemError>,
  fail_users:   HashSet<String>,
}

#[derive(Default)]
pub struct MemStore {
  inner: Mutex<Inner>,
}

impl MemStore {
  /// Queue errors returned by the next append calls, in order.
  pub fn fail_next_appends(&self, errors: Vec<MemError>) {
    self.inner.lock().unwrap().append_fails = errors.into();
  }

  /// Make every append for these users fail with `Unavailable`.
  pub fn fail_appends_for(&self, users: &[&str]) {
    self.inner.lock().unwrap().fail_users =
      users.iter().map(|u| (*u).to_owned()).collect();
  }

  fn take_injected(&self, inner: &mut Inner, user: &UserId) -> Option<MemError> {
    if let Some(err) = inner.append_fails.pop_front() {
      return Some(err);
    }
    if inner.fail_users.contains(user.as_str()) {
      return Some(MemError {
        code:    ErrorCode::Unavailable,
        message: format!("injected failure for {user}"),
      });
    }
    None
  }
}

fn active_total(inner: &Inner, user: &UserId, as_of: DateTime<Utc>) -> i64 {
  inner
    .entries
    .iter()
    .filter(|e| e.user_id == *user && e.created_at <= as_of && e.is_active(as_of))
    .map(|e| e.amount)
    .sum()
}

fn build_entry(input: NewEntry, now: DateTime<Utc>) -> LedgerEntry {
  LedgerEntry {
    entry_id:    input.entry_id,
    user_id:     input.user_id,
    amount:      input.amount,
    reason:      input.reason,
    action_key:  input.action_key,
    change_type: input.change_type,
    created_at:  now,
    expires_at:  input.expires_at,
    consumed_at: None,
  }
}

// ─── LedgerStore ─────────────────────────────────────────────────────────────

impl LedgerStore for MemStore {
  type Error = MemError;

  async fn append(&self, entry: NewEntry) -> Result<Appended, MemError> {
    let mut inner = self.inner.lock().unwrap();
    if let Some(err) = self.take_injected(&mut inner, &entry.user_id) {
      return Err(err);
    }
    if inner.entries.iter().any(|e| e.entry_id == entry.entry_id) {
      return Ok(Appended { created: false });
    }
    inner.entries.push(build_entry(entry, Utc::now()));
    Ok(Appended { created: true })
  }

  async fn append_counted(
    &self,
    entry: NewEntry,
    cap:   Option<u32>,
  ) -> Result<CountedAppend, MemError> {
    let mut inner = self.inner.lock().unwrap();
    if let Some(err) = self.take_injected(&mut inner, &entry.user_id) {
      return Err(err);
    }
    if inner.entries.iter().any(|e| e.entry_id == entry.entry_id) {
      return Ok(CountedAppend::Duplicate);
    }

    let now = Utc::now();
    let action = entry.action_key.clone().unwrap_or_default();
    let key = (entry.user_id.as_str().to_owned(), action, day_key(now));
    let count = inner.counters.get(&key).copied().unwrap_or(0);

    if let Some(cap) = cap
      && count >= cap
    {
      return Ok(CountedAppend::CapExceeded);
    }

    inner.entries.push(build_entry(entry, now));
    inner.counters.insert(key, count + 1);
    Ok(CountedAppend::Created)
  }

  async fn append_deduction(&self, entry: NewEntry) -> Result<DeductionOutcome, MemError> {
    let mut inner = self.inner.lock().unwrap();
    if let Some(err) = self.take_injected(&mut inner, &entry.user_id) {
      return Err(err);
    }
    if inner.entries.iter().any(|e| e.entry_id == entry.entry_id) {
      return Ok(DeductionOutcome { deducted: 0, duplicate: true });
    }

    let now = Utc::now();
    let requested = entry.amount.unsigned_abs() as i64;
    let balance = active_total(&inner, &entry.user_id, now).max(0);
    let deducted = requested.min(balance);

    let mut clamped = entry;
    clamped.amount = -deducted;
    inner.entries.push(build_entry(clamped, now));
    Ok(DeductionOutcome { deducted, duplicate: false })
  }

  async fn entry(&self, id: &EntryId) -> Result<Option<LedgerEntry>, MemError> {
    let inner = self.inner.lock().unwrap();
    Ok(inner.entries.iter().find(|e| e.entry_id == *id).cloned())
  }

  async fn entries_for_user(&self, user: &UserId) -> Result<Vec<LedgerEntry>, MemError> {
    let inner = self.inner.lock().unwrap();
    let mut entries: Vec<_> = inner
      .entries
      .iter()
      .filter(|e| e.user_id == *user)
      .cloned()
      .collect();
    entries.reverse();
    Ok(entries)
  }

  async fn balance(
    &self,
    user:  &UserId,
    as_of: Option<DateTime<Utc>>,
  ) -> Result<BalanceView, MemError> {
    let as_of = as_of.unwrap_or_else(Utc::now);
    let inner = self.inner.lock().unwrap();
    Ok(BalanceView {
      user_id: user.clone(),
      as_of,
      total: active_total(&inner, user, as_of),
    })
  }

  async fn daily_count(
    &self,
    user:       &UserId,
    action_key: &str,
    day:        &str,
  ) -> Result<u32, MemError> {
    let inner = self.inner.lock().unwrap();
    let key = (user.as_str().to_owned(), action_key.to_owned(), day.to_owned());
    Ok(inner.counters.get(&key).copied().unwrap_or(0))
  }

  async fn sweep_expired(
    &self,
    user:  &UserId,
    as_of: DateTime<Utc>,
  ) -> Result<u32, MemError> {
    let mut inner = self.inner.lock().unwrap();
    let mut stamped = 0;
    for e in inner.entries.iter_mut() {
      if e.user_id == *user
        && e.change_type == ChangeType::Add
        && e.consumed_at.is_none()
        && e.expires_at.is_some_and(|exp| exp <= as_of)
      {
        e.consumed_at = Some(as_of);
        stamped += 1;
      }
    }
    Ok(stamped)
  }
}

// ─── MembershipStore ─────────────────────────────────────────────────────────

impl MembershipStore for MemStore {
  type Error = MemError;

  async fn apply(
    &self,
    program:     &ProgramId,
    application: NewMembership,
    limits:      &ProgramLimits,
  ) -> Result<AdmissionOutcome, MemError> {
    let mut inner = self.inner.lock().unwrap();

    let in_program: Vec<&Membership> = inner
      .memberships
      .iter()
      .filter(|m| m.program_id == *program)
      .collect();

    if in_program.iter().any(|m| m.user_id == application.user_id) {
      return Ok(AdmissionOutcome::DuplicateApplication);
    }
    if in_program
      .iter()
      .any(|m| m.status != MemberStatus::Rejected && m.nickname == application.nickname)
    {
      return Ok(AdmissionOutcome::NicknameTaken);
    }

    let holding = in_program
      .iter()
      .filter(|m| m.status != MemberStatus::Rejected)
      .count();
    if limits.enforce_capacity && holding as u32 >= limits.capacity {
      return Ok(AdmissionOutcome::CapacityReached);
    }

    let membership = Membership {
      program_id:  program.clone(),
      user_id:     application.user_id,
      nickname:    application.nickname,
      status:      MemberStatus::Pending,
      joined_at:   Utc::now(),
      approved_at: None,
      rejected_at: None,
    };
    inner.memberships.push(membership.clone());
    Ok(AdmissionOutcome::Admitted(membership))
  }

  async fn membership(
    &self,
    program: &ProgramId,
    user:    &UserId,
  ) -> Result<Option<Membership>, MemError> {
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .memberships
        .iter()
        .find(|m| m.program_id == *program && m.user_id == *user)
        .cloned(),
    )
  }

  async fn members(&self, program: &ProgramId) -> Result<Vec<Membership>, MemError> {
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .memberships
        .iter()
        .filter(|m| m.program_id == *program)
        .cloned()
        .collect(),
    )
  }

  async fn set_status(
    &self,
    program: &ProgramId,
    user:    &UserId,
    status:  MemberStatus,
  ) -> Result<Membership, MemError> {
    let mut inner = self.inner.lock().unwrap();
    let membership = inner
      .memberships
      .iter_mut()
      .find(|m| m.program_id == *program && m.user_id == *user)
      .ok_or_else(|| MemError::not_found(format!("membership {program}/{user}")))?;

    membership.status = status;
    let now = Utc::now();
    match status {
      MemberStatus::Approved => membership.approved_at = Some(now),
      MemberStatus::Rejected => membership.rejected_at = Some(now),
      MemberStatus::Pending => {}
    }
    Ok(membership.clone())
  }
}

// ─── PendingStore ────────────────────────────────────────────────────────────

impl PendingStore for MemStore {
  type Error = MemError;

  async fn record(&self, pending: NewPendingReward) -> Result<PendingReward, MemError> {
    let mut inner = self.inner.lock().unwrap();
    let record = PendingReward {
      pending_id:  Uuid::new_v4(),
      user_id:     pending.user_id,
      action_key:  pending.action_key,
      metadata:    pending.metadata,
      error:       pending.error,
      error_code:  pending.error_code,
      created_at:  Utc::now(),
      status:      PendingStatus::Open,
      resolved_at: None,
    };
    inner.pending.push(record.clone());
    Ok(record)
  }

  async fn open(&self, limit: usize) -> Result<Vec<PendingReward>, MemError> {
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .pending
        .iter()
        .filter(|p| p.status == PendingStatus::Open)
        .take(limit)
        .cloned()
        .collect(),
    )
  }

  async fn resolve(&self, id: &Uuid) -> Result<PendingReward, MemError> {
    let mut inner = self.inner.lock().unwrap();
    let record = inner
      .pending
      .iter_mut()
      .find(|p| p.pending_id == *id)
      .ok_or_else(|| MemError::not_found(format!("pending reward {id}")))?;

    if record.status == PendingStatus::Open {
      record.status = PendingStatus::Resolved;
      record.resolved_at = Some(Utc::now());
    }
    Ok(record.clone())
  }
}

// ─── ConsentStore ────────────────────────────────────────────────────────────

impl ConsentStore for MemStore {
  type Error = MemError;

  async fn set_marketing_consent(&self, user: &UserId, granted: bool) -> Result<(), MemError> {
    let mut inner = self.inner.lock().unwrap();
    inner.consents.insert(user.as_str().to_owned(), granted);
    Ok(())
  }

  async fn has_marketing_consent(&self, user: &UserId) -> Result<bool, MemError> {
    let inner = self.inner.lock().unwrap();
    Ok(inner.consents.get(user.as_str()).copied().unwrap_or(false))
  }
}

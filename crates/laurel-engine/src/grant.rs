//! The reward grant engine.
//!
//! Looks up what an action is worth, derives the deterministic entry id,
//! and performs the atomic append. Expected outcomes (duplicate, daily
//! limit, no policy) are values, not errors — only caller mistakes and
//! store failures surface as [`EngineError`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use laurel_core::{
  error::{ErrorCode, StoreError},
  id::{EntryId, UserId},
  ledger::NewEntry,
  policy::{ActionPolicy, RewardPolicy},
  store::{Appended, CountedAppend, DeductionOutcome, LedgerStore},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Caller errors vs store failures. Expected business outcomes never land
/// here; they are [`GrantOutcome`] variants.
#[derive(Debug, Error)]
pub enum EngineError<E: StoreError> {
  /// Malformed input. Terminal; never retried.
  #[error("invalid request: {0}")]
  Invalid(String),

  /// A referenced object (e.g. a program) is not configured.
  #[error("not found: {0}")]
  NotFound(String),

  #[error(transparent)]
  Store(E),
}

impl<E: StoreError> EngineError<E> {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Invalid(_) => ErrorCode::InvalidArgument,
      Self::NotFound(_) => ErrorCode::NotFound,
      Self::Store(e) => e.code(),
    }
  }

  /// Caller errors are surfaced immediately and never produce a pending
  /// record; store errors may.
  pub fn is_caller_error(&self) -> bool {
    matches!(self, Self::Invalid(_) | Self::NotFound(_))
  }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// Result of one grant attempt. All four variants are successes from the
/// caller's point of view — none of them should fail the user's primary
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
  /// A new ledger entry was written.
  Granted { amount: i64 },
  /// The deterministic id already existed; nothing was written and no
  /// counter moved.
  Duplicate { amount: i64 },
  /// No reward is configured for this action (or the amount is zero).
  NoPolicy,
  /// The per-day cap for this action was already reached.
  DailyLimit,
}

impl GrantOutcome {
  /// Points credited by this call (0 for everything but `Granted`).
  pub fn amount_granted(&self) -> i64 {
    match self {
      Self::Granted { amount } => *amount,
      _ => 0,
    }
  }

  pub fn is_duplicate(&self) -> bool { matches!(self, Self::Duplicate { .. }) }
}

/// A post being rewarded: id for idempotency, kind for policy lookup.
#[derive(Debug, Clone)]
pub struct PostRef {
  pub post_id: String,
  pub kind:    String,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Policy-driven grant/deduct operations over a [`LedgerStore`].
///
/// Cheap to clone — both collaborators are reference-counted.
pub struct RewardEngine<S, P> {
  store:  Arc<S>,
  policy: Arc<P>,
}

impl<S, P> Clone for RewardEngine<S, P> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), policy: self.policy.clone() }
  }
}

impl<S, P> RewardEngine<S, P>
where
  S: LedgerStore,
  P: RewardPolicy,
{
  pub fn new(store: Arc<S>, policy: Arc<P>) -> Self { Self { store, policy } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Grant the configured reward for a user action.
  ///
  /// `context_id` scopes the idempotency key: one grant per
  /// `(action, user, context)` no matter how often the call is replayed.
  pub async fn grant_for_action(
    &self,
    user:       &UserId,
    action_key: &str,
    context_id: &str,
  ) -> Result<GrantOutcome, EngineError<S::Error>> {
    if action_key.is_empty() {
      return Err(EngineError::Invalid("empty action key".into()));
    }
    if context_id.is_empty() {
      return Err(EngineError::Invalid("empty context id".into()));
    }

    let Some(policy) = self.policy.action_policy(action_key) else {
      return Ok(GrantOutcome::NoPolicy);
    };

    let entry_id = EntryId::for_action(action_key, user, context_id);
    self.grant_with_policy(user, action_key, entry_id, &policy).await
  }

  /// Grant the configured reward for a new post, keyed by post id.
  pub async fn grant_for_post(
    &self,
    user: &UserId,
    post: &PostRef,
  ) -> Result<GrantOutcome, EngineError<S::Error>> {
    if post.post_id.is_empty() {
      return Err(EngineError::Invalid("empty post id".into()));
    }
    if post.kind.is_empty() {
      return Err(EngineError::Invalid("empty post kind".into()));
    }

    let Some(policy) = self.policy.post_policy(&post.kind) else {
      return Ok(GrantOutcome::NoPolicy);
    };

    // The daily counter is keyed per post kind, the entry per post id.
    let action_key = format!("post.{}", post.kind);
    let entry_id = EntryId::for_post(user, &post.post_id);
    self.grant_with_policy(user, &action_key, entry_id, &policy).await
  }

  async fn grant_with_policy(
    &self,
    user:       &UserId,
    action_key: &str,
    entry_id:   EntryId,
    policy:     &ActionPolicy,
  ) -> Result<GrantOutcome, EngineError<S::Error>> {
    if policy.amount <= 0 {
      return Ok(GrantOutcome::NoPolicy);
    }

    let expires_at = policy
      .expires_after_days
      .map(|days| Utc::now() + Duration::days(i64::from(days)));

    let entry = NewEntry::grant(
      entry_id,
      user.clone(),
      policy.amount,
      action_key,
      Some(action_key.to_owned()),
      expires_at,
    );

    let appended = self
      .store
      .append_counted(entry, policy.daily_cap)
      .await
      .map_err(EngineError::Store)?;

    Ok(match appended {
      CountedAppend::Created => GrantOutcome::Granted { amount: policy.amount },
      CountedAppend::Duplicate => GrantOutcome::Duplicate { amount: policy.amount },
      CountedAppend::CapExceeded => GrantOutcome::DailyLimit,
    })
  }

  /// Low-level grant used by bulk payouts: the caller supplies the amount
  /// and the (deterministic) entry id, bypassing policy lookup.
  pub async fn add_reward(
    &self,
    user:       &UserId,
    amount:     i64,
    reason:     &str,
    entry_id:   EntryId,
    expires_at: Option<DateTime<Utc>>,
  ) -> Result<Appended, EngineError<S::Error>> {
    if amount <= 0 {
      return Err(EngineError::Invalid(format!("non-positive amount: {amount}")));
    }

    let entry = NewEntry::grant(
      entry_id,
      user.clone(),
      amount,
      reason,
      None,
      expires_at,
    );

    self.store.append(entry).await.map_err(EngineError::Store)
  }

  /// Idempotent deduction, clamped at the active balance by the store.
  /// Without an explicit `entry_id` the deduction gets a random id and is
  /// NOT replay-safe.
  pub async fn deduct(
    &self,
    user:     &UserId,
    amount:   i64,
    reason:   &str,
    entry_id: Option<EntryId>,
  ) -> Result<DeductionOutcome, EngineError<S::Error>> {
    if amount <= 0 {
      return Err(EngineError::Invalid(format!("non-positive amount: {amount}")));
    }

    let entry = NewEntry::deduction(
      entry_id.unwrap_or_else(EntryId::random),
      user.clone(),
      amount,
      reason,
    );

    self.store.append_deduction(entry).await.map_err(EngineError::Store)
  }
}

//! The retry/pending shell around grant calls.
//!
//! A user-facing action must never fail or roll back because its reward
//! side-effect failed. The shell makes that guarantee operational: bounded
//! immediate retries with exponential backoff, explicit error
//! classification, and — when the store stays down — a durable pending
//! record that the reconciliation pass replays later. The shell returns a
//! structured outcome in every case; it has no error path.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use laurel_core::{
  error::{ErrorCode, StoreError},
  id::UserId,
  pending::{NewPendingReward, PendingReward, PendingStatus},
  policy::RewardPolicy,
  store::{LedgerStore, PendingStore},
};

use crate::grant::{EngineError, GrantOutcome, PostRef, RewardEngine};

// ─── Retry policy ────────────────────────────────────────────────────────────

/// Tuning for the immediate-retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts:    u32,
  /// Backoff after the n-th failed attempt is `base_delay * 2^n`.
  pub base_delay:      Duration,
  /// Hard bound on one attempt so the caller's request is never stalled
  /// by a hung store call.
  pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:    3,
      base_delay:      Duration::from_millis(100),
      attempt_timeout: Duration::from_secs(2),
    }
  }
}

impl RetryPolicy {
  fn delay_after(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// Message fragments that mark an error as transient even when its code
/// does not (connection churn surfaces as opaque wrapper errors).
const TRANSIENT_SIGNALS: &[&str] = &[
  "connection reset",
  "connection refused",
  "broken pipe",
  "timed out",
  "timeout",
  "unavailable",
];

fn is_transient(code: ErrorCode, message: &str) -> bool {
  if code.is_transient() {
    return true;
  }
  let lower = message.to_ascii_lowercase();
  TRANSIENT_SIGNALS.iter().any(|sig| lower.contains(sig))
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// What the caller gets back. Never an `Err` — reward granting is
/// best-effort relative to the primary action it accompanies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ShellOutcome {
  Granted { amount: i64 },
  Duplicate { amount: i64 },
  NoPolicy,
  DailyLimit,
  /// Retries exhausted (or terminal store error); a durable pending
  /// record now owns the grant.
  Pending { pending_id: Uuid },
  /// No authenticated user on the request.
  NoAuth,
  /// Caller error, or the pending write itself failed (logged).
  Failed { code: ErrorCode },
}

impl ShellOutcome {
  pub fn is_success(&self) -> bool {
    matches!(
      self,
      Self::Granted { .. } | Self::Duplicate { .. } | Self::NoPolicy | Self::DailyLimit
    )
  }
}

/// Tallies of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileReport {
  pub examined:   usize,
  pub resolved:   usize,
  pub still_open: usize,
}

// ─── The grant being attempted ───────────────────────────────────────────────

enum GrantCall<'a> {
  Action { action_key: &'a str, context_id: &'a str },
  Post(&'a PostRef),
}

impl GrantCall<'_> {
  fn action_key(&self) -> String {
    match self {
      Self::Action { action_key, .. } => (*action_key).to_owned(),
      Self::Post(post) => format!("post.{}", post.kind),
    }
  }

  fn metadata(&self, extra: serde_json::Value) -> serde_json::Value {
    let mut meta = match self {
      Self::Action { context_id, .. } => {
        serde_json::json!({ "context_id": context_id })
      }
      Self::Post(post) => {
        serde_json::json!({ "post_id": post.post_id, "kind": post.kind })
      }
    };
    if let (Some(obj), Some(extra_obj)) = (meta.as_object_mut(), extra.as_object()) {
      for (k, v) in extra_obj {
        obj.entry(k.clone()).or_insert_with(|| v.clone());
      }
    }
    meta
  }
}

// ─── Shell ───────────────────────────────────────────────────────────────────

/// Retry wrapper over [`RewardEngine`] plus the pending queue.
pub struct RewardShell<S, P> {
  engine:  RewardEngine<S, P>,
  pending: Arc<S>,
  retry:   RetryPolicy,
}

impl<S, P> RewardShell<S, P>
where
  S: LedgerStore + PendingStore,
  P: RewardPolicy,
{
  pub fn new(store: Arc<S>, policy: Arc<P>, retry: RetryPolicy) -> Self {
    Self {
      engine: RewardEngine::new(store.clone(), policy),
      pending: store,
      retry,
    }
  }

  pub fn engine(&self) -> &RewardEngine<S, P> { &self.engine }

  /// Best-effort grant for a user action. `user` is `None` when the
  /// request carried no verified identity.
  pub async fn grant_for_action(
    &self,
    user:       Option<&UserId>,
    action_key: &str,
    context_id: &str,
    metadata:   serde_json::Value,
  ) -> ShellOutcome {
    let call = GrantCall::Action { action_key, context_id };
    self.run(user, call, metadata).await
  }

  /// Best-effort grant for a new post.
  pub async fn grant_for_post(
    &self,
    user: Option<&UserId>,
    post: &PostRef,
  ) -> ShellOutcome {
    self.run(user, GrantCall::Post(post), serde_json::Value::Null).await
  }

  async fn run(
    &self,
    user:     Option<&UserId>,
    call:     GrantCall<'_>,
    metadata: serde_json::Value,
  ) -> ShellOutcome {
    let Some(user) = user else {
      return ShellOutcome::NoAuth;
    };

    // attempt → classify → retry-or-terminate → persist-pending
    let mut last: (ErrorCode, String) = (ErrorCode::Unknown, String::new());

    for attempt in 0..self.retry.max_attempts {
      match timeout(self.retry.attempt_timeout, self.attempt(user, &call)).await {
        Ok(Ok(outcome)) => return Self::settle(outcome),
        Ok(Err(e)) => {
          if e.is_caller_error() {
            return ShellOutcome::Failed { code: e.code() };
          }
          let code = e.code();
          let message = e.to_string();
          if !is_transient(code, &message) {
            // Terminal store error: no point in further attempts.
            last = (code, message);
            break;
          }
          tracing::debug!(
            user = %user,
            attempt,
            code = %code,
            "transient grant failure, will retry"
          );
          last = (code, message);
        }
        Err(_elapsed) => {
          last = (
            ErrorCode::DeadlineExceeded,
            format!("grant attempt exceeded {:?}", self.retry.attempt_timeout),
          );
        }
      }

      if attempt + 1 < self.retry.max_attempts {
        sleep(self.retry.delay_after(attempt)).await;
      }
    }

    self.persist_pending(user, &call, metadata, last).await
  }

  async fn attempt(
    &self,
    user: &UserId,
    call: &GrantCall<'_>,
  ) -> Result<GrantOutcome, EngineError<<S as LedgerStore>::Error>> {
    match call {
      GrantCall::Action { action_key, context_id } => {
        self.engine.grant_for_action(user, action_key, context_id).await
      }
      GrantCall::Post(post) => self.engine.grant_for_post(user, post).await,
    }
  }

  fn settle(outcome: GrantOutcome) -> ShellOutcome {
    match outcome {
      GrantOutcome::Granted { amount } => ShellOutcome::Granted { amount },
      GrantOutcome::Duplicate { amount } => ShellOutcome::Duplicate { amount },
      GrantOutcome::NoPolicy => ShellOutcome::NoPolicy,
      GrantOutcome::DailyLimit => ShellOutcome::DailyLimit,
    }
  }

  async fn persist_pending(
    &self,
    user:          &UserId,
    call:          &GrantCall<'_>,
    metadata:      serde_json::Value,
    (code, error): (ErrorCode, String),
  ) -> ShellOutcome {
    let record = NewPendingReward {
      user_id:    user.clone(),
      action_key: call.action_key(),
      metadata:   call.metadata(metadata),
      error,
      error_code: code.as_str().to_owned(),
    };

    match self.pending.record(record).await {
      Ok(p) => {
        tracing::warn!(
          user = %user,
          pending_id = %p.pending_id,
          code = %code,
          "grant deferred to pending queue"
        );
        ShellOutcome::Pending { pending_id: p.pending_id }
      }
      Err(e) => {
        tracing::error!(
          user = %user,
          error = %e,
          "failed to persist pending reward"
        );
        ShellOutcome::Failed { code: e.code() }
      }
    }
  }

  // ── Reconciliation ───────────────────────────────────────────────────────

  /// Replay open pending rewards through the engine. Resolves records
  /// whose grant succeeds (or turns out to be a duplicate or to have no
  /// policy any more); leaves daily-limited and still-failing records
  /// open for a later pass.
  pub async fn reconcile(
    &self,
    limit: usize,
  ) -> Result<ReconcileReport, <S as PendingStore>::Error> {
    let open = PendingStore::open(&*self.pending, limit).await?;
    let mut report = ReconcileReport { examined: open.len(), ..Default::default() };

    for record in open {
      if self.replay(&record).await {
        match self.pending.resolve(&record.pending_id).await {
          Ok(_) => report.resolved += 1,
          Err(e) => {
            tracing::warn!(
              pending_id = %record.pending_id,
              error = %e,
              "replayed pending reward but could not mark it resolved"
            );
            report.still_open += 1;
          }
        }
      } else {
        report.still_open += 1;
      }
    }

    Ok(report)
  }

  /// One replay attempt; `true` means the record can be resolved.
  async fn replay(&self, record: &PendingReward) -> bool {
    debug_assert_eq!(record.status, PendingStatus::Open);

    let meta = &record.metadata;
    let result = if let Some(kind) = record.action_key.strip_prefix("post.") {
      let Some(post_id) = meta.get("post_id").and_then(|v| v.as_str()) else {
        tracing::warn!(pending_id = %record.pending_id, "pending record lacks post_id");
        return false;
      };
      let post = PostRef { post_id: post_id.to_owned(), kind: kind.to_owned() };
      self.engine.grant_for_post(&record.user_id, &post).await
    } else {
      let Some(context_id) = meta.get("context_id").and_then(|v| v.as_str()) else {
        tracing::warn!(pending_id = %record.pending_id, "pending record lacks context_id");
        return false;
      };
      self
        .engine
        .grant_for_action(&record.user_id, &record.action_key, context_id)
        .await
    };

    match result {
      Ok(GrantOutcome::Granted { .. })
      | Ok(GrantOutcome::Duplicate { .. })
      | Ok(GrantOutcome::NoPolicy) => true,
      // May succeed on a later day; keep the record open.
      Ok(GrantOutcome::DailyLimit) => false,
      Err(e) => {
        tracing::debug!(
          pending_id = %record.pending_id,
          error = %e,
          "pending replay failed"
        );
        false
      }
    }
  }
}

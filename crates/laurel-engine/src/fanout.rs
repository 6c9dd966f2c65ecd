//! Bulk reward-and-notify fan-out.
//!
//! Recipients are filtered first, then processed in fixed-size batches
//! with a fixed delay between batches (external throughput limits, not
//! correctness). Grants inside a batch run concurrently; they are
//! idempotent per (broadcast, user), so re-running a partially failed
//! broadcast can never double-grant. A message is delivered only to users
//! whose grant succeeded — never notify-without-grant when a reward was
//! promised.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{task::JoinSet, time::sleep};

use laurel_core::{
  gateway::{
    BroadcastReport, BroadcastStatus, EligibilityFilter, Message, PushGateway,
  },
  id::{EntryId, UserId},
  mirror::ContentMirror,
  policy::RewardPolicy,
  store::{ConsentStore, LedgerStore},
};

use crate::grant::{EngineError, RewardEngine};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
  /// Recipients processed per batch; bounds in-flight grant concurrency.
  pub batch_size:  usize,
  /// Pause between batches.
  pub batch_delay: Duration,
}

impl Default for FanoutConfig {
  fn default() -> Self {
    Self {
      batch_size:  100,
      batch_delay: Duration::from_millis(1200),
    }
  }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Point payout attached to a broadcast.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastReward {
  pub amount:     i64,
  pub expires_at: Option<DateTime<Utc>>,
}

/// One broadcast execution.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
  /// Id of the initiating record; scopes the per-recipient grant ids.
  pub broadcast_id: String,
  pub recipients:   Vec<UserId>,
  pub message:      Message,
  pub reward:       Option<BroadcastReward>,
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

pub struct Broadcaster<S, P, G, C> {
  engine:  RewardEngine<S, P>,
  gateway: Arc<G>,
  mirror:  Arc<C>,
  config:  FanoutConfig,
}

impl<S, P, G, C> Broadcaster<S, P, G, C>
where
  S: LedgerStore + 'static,
  P: RewardPolicy + 'static,
  G: PushGateway,
  C: ContentMirror,
{
  pub fn new(
    engine:  RewardEngine<S, P>,
    gateway: Arc<G>,
    mirror:  Arc<C>,
    config:  FanoutConfig,
  ) -> Self {
    Self { engine, gateway, mirror, config }
  }

  /// Run one broadcast to completion and report per-class outcomes.
  ///
  /// Per-recipient grant and delivery failures are aggregated, never
  /// propagated; only malformed requests error out.
  pub async fn run<F>(
    &self,
    request: &BroadcastRequest,
    filter:  &F,
  ) -> Result<BroadcastReport, EngineError<S::Error>>
  where
    F: EligibilityFilter,
  {
    if request.broadcast_id.is_empty() {
      return Err(EngineError::Invalid("empty broadcast id".into()));
    }
    if let Some(reward) = &request.reward
      && reward.amount <= 0
    {
      return Err(EngineError::Invalid(format!(
        "non-positive reward amount: {}",
        reward.amount
      )));
    }

    // Dedup while preserving submission order.
    let mut seen = HashSet::new();
    let recipients: Vec<UserId> = request
      .recipients
      .iter()
      .filter(|u| seen.insert((*u).clone()))
      .cloned()
      .collect();

    // Filter first; filtered users never see a grant attempt.
    let mut eligible = Vec::with_capacity(recipients.len());
    let mut filtered = Vec::new();
    for user in recipients {
      if filter.eligible(&user).await {
        eligible.push(user);
      } else {
        filtered.push(user);
      }
    }

    let eligible_total = eligible.len();
    let mut succeeded = Vec::new();
    let mut reward_failed = Vec::new();
    let mut delivery_failed = Vec::new();

    for (index, batch) in eligible.chunks(self.config.batch_size).enumerate() {
      if index > 0 {
        sleep(self.config.batch_delay).await;
      }

      let to_deliver = match &request.reward {
        Some(reward) => {
          self
            .grant_batch(request, *reward, batch, &mut reward_failed)
            .await
        }
        None => batch.to_vec(),
      };

      if to_deliver.is_empty() {
        continue;
      }

      let delivery = self.gateway.deliver(&to_deliver, &request.message).await;
      succeeded.extend(delivery.delivered);
      delivery_failed.extend(delivery.failed);
    }

    let status = derive_status(eligible_total, filtered.len(), succeeded.len());
    let report = BroadcastReport {
      status,
      succeeded,
      filtered,
      reward_failed,
      delivery_failed,
    };

    tracing::info!(
      broadcast_id = %request.broadcast_id,
      status = ?status,
      success = report.success_count(),
      failure = report.failure_count(),
      "broadcast finished"
    );

    // Write-back to the initiating record is best-effort.
    if let Err(e) = self
      .mirror
      .broadcast_finished(&request.broadcast_id, &report)
      .await
    {
      tracing::warn!(
        broadcast_id = %request.broadcast_id,
        error = %e,
        "broadcast status write-back failed"
      );
    }

    Ok(report)
  }

  /// Grant the batch concurrently; returns the users whose grant landed
  /// (duplicates count — the points are already there).
  async fn grant_batch(
    &self,
    request:       &BroadcastRequest,
    reward:        BroadcastReward,
    batch:         &[UserId],
    reward_failed: &mut Vec<UserId>,
  ) -> Vec<UserId> {
    let mut tasks = JoinSet::new();

    for user in batch {
      let engine = self.engine.clone();
      let user = user.clone();
      let entry_id = EntryId::for_broadcast(&request.broadcast_id, &user);
      let reason = request.message.title.clone();
      tasks.spawn(async move {
        let result = engine
          .add_reward(&user, reward.amount, &reason, entry_id, reward.expires_at)
          .await;
        (user, result)
      });
    }

    let mut granted = Vec::with_capacity(batch.len());
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((user, Ok(_))) => granted.push(user),
        Ok((user, Err(e))) => {
          tracing::warn!(
            broadcast_id = %request.broadcast_id,
            user = %user,
            error = %e,
            "broadcast grant failed"
          );
          reward_failed.push(user);
        }
        Err(join_err) => {
          // A panicked grant task; the recipient is picked up by the
          // operator re-run (idempotent ids make that safe).
          tracing::error!(
            broadcast_id = %request.broadcast_id,
            error = %join_err,
            "broadcast grant task failed"
          );
        }
      }
    }

    granted
  }
}

fn derive_status(eligible: usize, filtered: usize, success: usize) -> BroadcastStatus {
  if eligible == 0 && filtered == 0 {
    // Empty recipient list: vacuously complete.
    return BroadcastStatus::Completed;
  }
  if eligible > 0 && success == eligible {
    BroadcastStatus::Completed
  } else if success > 0 {
    BroadcastStatus::Partial
  } else {
    BroadcastStatus::Failed
  }
}

// ─── Consent filter ──────────────────────────────────────────────────────────

/// Adapts a [`ConsentStore`] to the eligibility seam: only users with
/// marketing consent pass. A failed lookup makes the user ineligible —
/// the safe default for marketing sends.
pub struct ConsentFilter<S> {
  store: Arc<S>,
}

impl<S: ConsentStore> ConsentFilter<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }
}

impl<S: ConsentStore> EligibilityFilter for ConsentFilter<S> {
  async fn eligible(&self, user: &UserId) -> bool {
    match self.store.has_marketing_consent(user).await {
      Ok(granted) => granted,
      Err(e) => {
        tracing::warn!(
          user = %user,
          error = %e,
          "consent lookup failed; treating user as ineligible"
        );
        false
      }
    }
  }
}

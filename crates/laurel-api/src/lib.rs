//! JSON REST API for the laurel reward engine.
//!
//! Exposes an axum [`Router`] backed by any store implementing the
//! `laurel-core` traits. End-user identity arrives pre-verified from the
//! upstream gateway as an `x-user-id` header; admin endpoints use HTTP
//! Basic auth against an argon2 hash.

pub mod auth;
pub mod broadcasts;
pub mod error;
pub mod pending;
pub mod programs;
pub mod rewards;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Router,
  http::HeaderMap,
  routing::{get, post, put},
};
use serde::Deserialize;

use laurel_core::{
  gateway::PushGateway,
  id::UserId,
  mirror::ContentMirror,
  policy::{RewardPolicy, TablePolicy},
  store::{ConsentStore, LedgerStore, MembershipStore, PendingStore},
};
use laurel_engine::{
  admission::AdmissionController,
  fanout::{Broadcaster, FanoutConfig},
  retry::{RetryPolicy, RewardShell},
};

use auth::AuthConfig;

// ─── Store bound ─────────────────────────────────────────────────────────────

/// Everything the API needs from one storage backend.
pub trait AppStore:
  LedgerStore + MembershipStore + PendingStore + ConsentStore + Clone + Send + Sync + 'static
{
}

impl<T> AppStore for T where
  T: LedgerStore
    + MembershipStore
    + PendingStore
    + ConsentStore
    + Clone
    + Send
    + Sync
    + 'static
{
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` merged
/// with `LAUREL_*` environment overrides.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  pub auth_username:      String,
  /// PHC string produced by argon2; see the `--hash-password` helper.
  pub auth_password_hash: String,
  /// Reward amounts, daily caps, and program capacities.
  #[serde(default)]
  pub policy:             TablePolicy,
  #[serde(default)]
  pub retry:              RetrySection,
  #[serde(default)]
  pub fanout:             FanoutSection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrySection {
  pub max_attempts:       u32,
  pub base_delay_ms:      u64,
  pub attempt_timeout_ms: u64,
}

impl Default for RetrySection {
  fn default() -> Self {
    Self { max_attempts: 3, base_delay_ms: 100, attempt_timeout_ms: 2000 }
  }
}

impl From<RetrySection> for RetryPolicy {
  fn from(s: RetrySection) -> Self {
    Self {
      max_attempts:    s.max_attempts,
      base_delay:      Duration::from_millis(s.base_delay_ms),
      attempt_timeout: Duration::from_millis(s.attempt_timeout_ms),
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FanoutSection {
  pub batch_size:     usize,
  pub batch_delay_ms: u64,
}

impl Default for FanoutSection {
  fn default() -> Self {
    Self { batch_size: 100, batch_delay_ms: 1200 }
  }
}

impl From<FanoutSection> for FanoutConfig {
  fn from(s: FanoutSection) -> Self {
    Self {
      batch_size:  s.batch_size,
      batch_delay: Duration::from_millis(s.batch_delay_ms),
    }
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, P, G, C> {
  pub store:       Arc<S>,
  pub shell:       Arc<RewardShell<S, P>>,
  pub admission:   Arc<AdmissionController<S, P, C>>,
  pub broadcaster: Arc<Broadcaster<S, P, G, C>>,
  pub auth:        Arc<AuthConfig>,
}

impl<S, P, G, C> Clone for AppState<S, P, G, C> {
  fn clone(&self) -> Self {
    Self {
      store:       self.store.clone(),
      shell:       self.shell.clone(),
      admission:   self.admission.clone(),
      broadcaster: self.broadcaster.clone(),
      auth:        self.auth.clone(),
    }
  }
}

impl<S, P, G, C> AppState<S, P, G, C>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  /// Wire up the engine pieces over one store.
  pub fn build(
    store:   Arc<S>,
    policy:  Arc<P>,
    gateway: Arc<G>,
    mirror:  Arc<C>,
    auth:    AuthConfig,
    retry:   RetryPolicy,
    fanout:  FanoutConfig,
  ) -> Self {
    let shell = Arc::new(RewardShell::new(store.clone(), policy.clone(), retry));
    let admission = Arc::new(AdmissionController::new(
      store.clone(),
      policy.clone(),
      mirror.clone(),
    ));
    let broadcaster = Arc::new(Broadcaster::new(
      shell.engine().clone(),
      gateway,
      mirror,
      fanout,
    ));

    Self { store, shell, admission, broadcaster, auth: Arc::new(auth) }
  }
}

/// The verified end-user identity forwarded by the upstream gateway.
/// Absent header = anonymous request.
pub fn user_from_headers(headers: &HeaderMap) -> Option<UserId> {
  headers
    .get("x-user-id")
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(UserId::from)
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
pub fn router<S, P, G, C>(state: AppState<S, P, G, C>) -> Router
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  Router::new()
    // Rewards
    .route("/api/rewards/action", post(rewards::grant_action::<S, P, G, C>))
    .route("/api/rewards/post", post(rewards::grant_post::<S, P, G, C>))
    .route("/api/rewards/deduct", post(rewards::deduct::<S, P, G, C>))
    // Users
    .route("/api/users/{id}/balance", get(rewards::balance::<S, P, G, C>))
    .route("/api/users/{id}/ledger", get(rewards::ledger::<S, P, G, C>))
    .route("/api/users/{id}/consent", put(rewards::set_consent::<S, P, G, C>))
    // Programs
    .route("/api/programs/{id}/apply", post(programs::apply::<S, P, G, C>))
    .route("/api/programs/{id}/members", get(programs::members::<S, P, G, C>))
    .route(
      "/api/programs/{id}/members/{user}/status",
      post(programs::set_status::<S, P, G, C>),
    )
    // Broadcasts
    .route("/api/broadcasts", post(broadcasts::run::<S, P, G, C>))
    // Pending queue
    .route("/api/pending", get(pending::list::<S, P, G, C>))
    .route("/api/pending/reconcile", post(pending::reconcile::<S, P, G, C>))
    .with_state(state)
}

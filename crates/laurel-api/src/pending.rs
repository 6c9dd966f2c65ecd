//! Handlers for the pending-reward queue.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/api/pending` | admin; `?limit=` (default 50) |
//! | `POST` | `/api/pending/reconcile` | admin; replays open records |

use axum::{
  Json,
  extract::{Query, State},
};
use serde::Deserialize;

use laurel_core::{
  gateway::PushGateway,
  mirror::ContentMirror,
  pending::PendingReward,
  policy::RewardPolicy,
  store::PendingStore,
};
use laurel_engine::retry::ReconcileReport;

use crate::{AppState, AppStore, auth::Authenticated, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct LimitParams {
  #[serde(default = "default_limit")]
  pub limit: usize,
}

fn default_limit() -> usize { 50 }

/// `GET /api/pending?limit=50`
pub async fn list<S, P, G, C>(
  _auth: Authenticated,
  State(state): State<AppState<S, P, G, C>>,
  Query(params): Query<LimitParams>,
) -> Result<Json<Vec<PendingReward>>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let open = PendingStore::open(&*state.store, params.limit)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(open))
}

/// `POST /api/pending/reconcile?limit=50`
pub async fn reconcile<S, P, G, C>(
  _auth: Authenticated,
  State(state): State<AppState<S, P, G, C>>,
  Query(params): Query<LimitParams>,
) -> Result<Json<ReconcileReport>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let report = state
    .shell
    .reconcile(params.limit)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(report))
}

//! Handler for running a broadcast.
//!
//! `POST /api/broadcasts` — admin. The request runs to completion
//! (batching and inter-batch delays included) and answers with the full
//! per-class report, so the operator can re-run just the failed subset.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use laurel_core::{
  gateway::{AllowAll, BroadcastReport, Message, MessageKind, PushGateway},
  id::UserId,
  mirror::ContentMirror,
  policy::RewardPolicy,
};
use laurel_engine::fanout::{BroadcastRequest, BroadcastReward, ConsentFilter};

use crate::{AppState, AppStore, auth::Authenticated, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct BroadcastBody {
  /// Id of the initiating record (announcement, campaign, …).
  pub broadcast_id:              String,
  pub recipient_ids:             Vec<UserId>,
  pub title:                     String,
  pub body:                      String,
  pub kind:                      MessageKind,
  /// Flat per-recipient payout; omit for message-only broadcasts.
  pub reward_amount:             Option<i64>,
  pub reward_expires_at:         Option<DateTime<Utc>>,
  /// Drop recipients without marketing consent.
  #[serde(default)]
  pub require_marketing_consent: bool,
}

/// `POST /api/broadcasts`
pub async fn run<S, P, G, C>(
  _auth: Authenticated,
  State(state): State<AppState<S, P, G, C>>,
  Json(body): Json<BroadcastBody>,
) -> Result<Json<BroadcastReport>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let request = BroadcastRequest {
    broadcast_id: body.broadcast_id,
    recipients:   body.recipient_ids,
    message:      Message { title: body.title, body: body.body, kind: body.kind },
    reward:       body.reward_amount.map(|amount| BroadcastReward {
      amount,
      expires_at: body.reward_expires_at,
    }),
  };

  let report = if body.require_marketing_consent {
    let filter = ConsentFilter::new(state.store.clone());
    state.broadcaster.run(&request, &filter).await
  } else {
    state.broadcaster.run(&request, &AllowAll).await
  }
  .map_err(ApiError::from_engine)?;

  Ok(Json(report))
}

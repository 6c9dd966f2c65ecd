//! Handlers for reward grants, deductions, balances, and consent.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/rewards/action` | `x-user-id` header; body: [`GrantActionBody`] |
//! | `POST` | `/api/rewards/post` | `x-user-id` header; body: [`GrantPostBody`] |
//! | `POST` | `/api/rewards/deduct` | admin; body: [`DeductBody`] |
//! | `GET`  | `/api/users/:id/balance` | derived balance |
//! | `GET`  | `/api/users/:id/ledger` | full entry history, newest first |
//! | `PUT`  | `/api/users/:id/consent` | self-service; `x-user-id` must match |
//!
//! Grant endpoints always answer 200 with a structured outcome: the
//! caller's primary action must never fail because of the reward side.

use axum::{
  Json,
  extract::{Path, State},
  http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use laurel_core::{
  error::ErrorCode,
  gateway::PushGateway,
  id::{EntryId, UserId},
  ledger::{BalanceView, LedgerEntry},
  mirror::ContentMirror,
  policy::RewardPolicy,
  store::{ConsentStore, LedgerStore},
};
use laurel_engine::{grant::PostRef, retry::ShellOutcome};

use crate::{AppState, AppStore, error::ApiError, user_from_headers};

// ─── Grant response ──────────────────────────────────────────────────────────

/// Wire form of a shell outcome.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
  pub success:    bool,
  pub reason:     &'static str,
  pub amount:     i64,
  pub duplicate:  bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pending_id: Option<Uuid>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_code: Option<ErrorCode>,
}

impl From<ShellOutcome> for GrantResponse {
  fn from(outcome: ShellOutcome) -> Self {
    let mut r = GrantResponse {
      success:    false,
      reason:     "error",
      amount:     0,
      duplicate:  false,
      pending_id: None,
      error_code: None,
    };
    match outcome {
      ShellOutcome::Granted { amount } => {
        r.success = true;
        r.reason = "granted";
        r.amount = amount;
      }
      ShellOutcome::Duplicate { amount } => {
        r.success = true;
        r.reason = "duplicate";
        r.amount = amount;
        r.duplicate = true;
      }
      ShellOutcome::NoPolicy => {
        r.success = true;
        r.reason = "no_policy";
      }
      ShellOutcome::DailyLimit => r.reason = "daily_limit",
      ShellOutcome::Pending { pending_id } => {
        r.reason = "pending";
        r.pending_id = Some(pending_id);
      }
      ShellOutcome::NoAuth => r.reason = "no_auth",
      ShellOutcome::Failed { code } => r.error_code = Some(code),
    }
    r
  }
}

// ─── Grants ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GrantActionBody {
  pub action_key: String,
  /// Scopes the idempotency key (comment id, attendance day, …).
  pub context_id: String,
  /// Free-form context persisted with a pending record, if one is made.
  #[serde(default)]
  pub metadata:   serde_json::Value,
}

/// `POST /api/rewards/action`
pub async fn grant_action<S, P, G, C>(
  State(state): State<AppState<S, P, G, C>>,
  headers: HeaderMap,
  Json(body): Json<GrantActionBody>,
) -> Json<GrantResponse>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let user = user_from_headers(&headers);
  let outcome = state
    .shell
    .grant_for_action(user.as_ref(), &body.action_key, &body.context_id, body.metadata)
    .await;
  Json(outcome.into())
}

#[derive(Debug, Deserialize)]
pub struct GrantPostBody {
  pub post_id: String,
  pub kind:    String,
}

/// `POST /api/rewards/post`
pub async fn grant_post<S, P, G, C>(
  State(state): State<AppState<S, P, G, C>>,
  headers: HeaderMap,
  Json(body): Json<GrantPostBody>,
) -> Json<GrantResponse>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let user = user_from_headers(&headers);
  let post = PostRef { post_id: body.post_id, kind: body.kind };
  let outcome = state.shell.grant_for_post(user.as_ref(), &post).await;
  Json(outcome.into())
}

// ─── Deduction ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeductBody {
  pub user_id:  UserId,
  pub amount:   i64,
  pub reason:   String,
  /// Deterministic id for replay safety (e.g. an order number).
  pub entry_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeductResponse {
  pub deducted:  i64,
  pub duplicate: bool,
}

/// `POST /api/rewards/deduct` — admin.
pub async fn deduct<S, P, G, C>(
  _auth: crate::auth::Authenticated,
  State(state): State<AppState<S, P, G, C>>,
  Json(body): Json<DeductBody>,
) -> Result<Json<DeductResponse>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let outcome = state
    .shell
    .engine()
    .deduct(
      &body.user_id,
      body.amount,
      &body.reason,
      body.entry_id.map(EntryId::new),
    )
    .await
    .map_err(ApiError::from_engine)?;

  Ok(Json(DeductResponse {
    deducted:  outcome.deducted,
    duplicate: outcome.duplicate,
  }))
}

// ─── Balance & ledger ────────────────────────────────────────────────────────

/// `GET /api/users/:id/balance`
pub async fn balance<S, P, G, C>(
  State(state): State<AppState<S, P, G, C>>,
  Path(id): Path<String>,
) -> Result<Json<BalanceView>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let user = UserId::new(id);
  let view = state
    .store
    .balance(&user, None)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(view))
}

/// `GET /api/users/:id/ledger`
pub async fn ledger<S, P, G, C>(
  State(state): State<AppState<S, P, G, C>>,
  Path(id): Path<String>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let user = UserId::new(id);
  let entries = state
    .store
    .entries_for_user(&user)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(entries))
}

// ─── Consent ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConsentBody {
  pub marketing: bool,
}

/// `PUT /api/users/:id/consent` — a user may only change their own flag.
pub async fn set_consent<S, P, G, C>(
  State(state): State<AppState<S, P, G, C>>,
  Path(id): Path<String>,
  headers: HeaderMap,
  Json(body): Json<ConsentBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let caller = user_from_headers(&headers).ok_or(ApiError::Unauthorized)?;
  if caller.as_str() != id {
    return Err(ApiError::BadRequest(
      "consent can only be changed for the authenticated user".into(),
    ));
  }

  state
    .store
    .set_marketing_consent(&caller, body.marketing)
    .await
    .map_err(ApiError::from_store)?;

  Ok(Json(serde_json::json!({ "marketing": body.marketing })))
}

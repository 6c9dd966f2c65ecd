//! Handlers for program applications and the approval workflow.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/programs/:id/apply` | `x-user-id` header; body: `{"nickname": "..."}` |
//! | `GET`  | `/api/programs/:id/members` | admin |
//! | `POST` | `/api/programs/:id/members/:user/status` | admin; body: `{"status": "approved"}` |

use axum::{
  Json,
  extract::{Path, State},
  http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use laurel_core::{
  gateway::PushGateway,
  id::{ProgramId, UserId},
  membership::{MemberStatus, Membership},
  mirror::ContentMirror,
  policy::RewardPolicy,
  store::MembershipStore,
};
use laurel_engine::admission::ApplyOutcome;

use crate::{AppState, AppStore, auth::Authenticated, error::ApiError, user_from_headers};

// ─── Apply ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApplyBody {
  pub nickname: String,
}

/// Wire form of an application outcome.
#[derive(Debug, Serialize)]
pub struct ApplyResponse {
  pub status:     &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub membership: Option<Membership>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason:     Option<String>,
}

impl From<ApplyOutcome> for ApplyResponse {
  fn from(outcome: ApplyOutcome) -> Self {
    match outcome {
      ApplyOutcome::Admitted(m) => Self {
        status:     "admitted",
        membership: Some(m),
        reason:     None,
      },
      ApplyOutcome::InvalidNickname(reason) => Self {
        status:     "invalid_nickname",
        membership: None,
        reason:     Some(reason),
      },
      ApplyOutcome::DuplicateApplication => Self {
        status:     "duplicate_application",
        membership: None,
        reason:     None,
      },
      ApplyOutcome::NicknameTaken => Self {
        status:     "nickname_taken",
        membership: None,
        reason:     None,
      },
      ApplyOutcome::CapacityReached => Self {
        status:     "capacity_reached",
        membership: None,
        reason:     None,
      },
    }
  }
}

/// `POST /api/programs/:id/apply`
pub async fn apply<S, P, G, C>(
  State(state): State<AppState<S, P, G, C>>,
  Path(id): Path<String>,
  headers: HeaderMap,
  Json(body): Json<ApplyBody>,
) -> Result<Json<ApplyResponse>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let user = user_from_headers(&headers).ok_or(ApiError::Unauthorized)?;
  let program = ProgramId::new(id);

  let outcome = state
    .admission
    .apply(&program, &user, &body.nickname)
    .await
    .map_err(ApiError::from_engine)?;

  // A successful join may carry a reward; best-effort like every grant.
  if matches!(outcome, ApplyOutcome::Admitted(_)) {
    let granted = state
      .shell
      .grant_for_action(
        Some(&user),
        "program.join",
        program.as_str(),
        serde_json::json!({ "program_id": program.as_str() }),
      )
      .await;
    tracing::debug!(program = %program, user = %user, outcome = ?granted, "join grant");
  }

  Ok(Json(outcome.into()))
}

// ─── Members ─────────────────────────────────────────────────────────────────

/// `GET /api/programs/:id/members` — admin.
pub async fn members<S, P, G, C>(
  _auth: Authenticated,
  State(state): State<AppState<S, P, G, C>>,
  Path(id): Path<String>,
) -> Result<Json<Vec<Membership>>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let program = ProgramId::new(id);
  let members = state
    .store
    .members(&program)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(members))
}

// ─── Status transition ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusBody {
  pub status: MemberStatus,
}

/// `POST /api/programs/:id/members/:user/status` — admin; the entry point
/// of the external approval/rejection workflow.
pub async fn set_status<S, P, G, C>(
  _auth: Authenticated,
  State(state): State<AppState<S, P, G, C>>,
  Path((id, user)): Path<(String, String)>,
  Json(body): Json<StatusBody>,
) -> Result<Json<Membership>, ApiError>
where
  S: AppStore,
  P: RewardPolicy + 'static,
  G: PushGateway + 'static,
  C: ContentMirror + 'static,
{
  let program = ProgramId::new(id);
  let user = UserId::new(user);

  let membership = state
    .store
    .set_status(&program, &user, body.status)
    .await
    .map_err(ApiError::from_store)?;

  Ok(Json(membership))
}

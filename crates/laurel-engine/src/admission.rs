//! Transactional admission into capacity-limited programs.
//!
//! Nickname format checks run before the transaction to keep the
//! transaction body minimal; the duplicate/uniqueness/capacity checks run
//! inside the store's atomic `apply`. The CMS mirror is updated after
//! commit, best-effort.

use std::sync::Arc;

use laurel_core::{
  id::{ProgramId, UserId},
  membership::{Membership, NewMembership},
  mirror::ContentMirror,
  policy::RewardPolicy,
  store::{AdmissionOutcome, MembershipStore},
};

use crate::grant::EngineError;

// ─── Nickname validation ─────────────────────────────────────────────────────

pub const NICKNAME_MIN_CHARS: usize = 2;
pub const NICKNAME_MAX_CHARS: usize = 20;

/// Names members may not claim for themselves.
const RESERVED_NICKNAMES: &[&str] =
  &["admin", "administrator", "operator", "system", "official", "staff"];

/// Validate and normalise a requested nickname. Returns the trimmed name.
pub fn validate_nickname(raw: &str) -> Result<&str, String> {
  let name = raw.trim();
  let chars = name.chars().count();

  if chars < NICKNAME_MIN_CHARS {
    return Err(format!("nickname must be at least {NICKNAME_MIN_CHARS} characters"));
  }
  if chars > NICKNAME_MAX_CHARS {
    return Err(format!("nickname must be at most {NICKNAME_MAX_CHARS} characters"));
  }
  if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
    return Err("nickname must not contain whitespace".into());
  }
  if RESERVED_NICKNAMES.contains(&name.to_ascii_lowercase().as_str()) {
    return Err("nickname is reserved".into());
  }

  Ok(name)
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// Result of one application attempt. Every variant except `Admitted` is an
/// expected outcome — returned, never thrown.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
  Admitted(Membership),
  InvalidNickname(String),
  DuplicateApplication,
  NicknameTaken,
  CapacityReached,
}

// ─── Controller ──────────────────────────────────────────────────────────────

pub struct AdmissionController<M, P, C> {
  members: Arc<M>,
  policy:  Arc<P>,
  mirror:  Arc<C>,
}

impl<M, P, C> AdmissionController<M, P, C>
where
  M: MembershipStore,
  P: RewardPolicy,
  C: ContentMirror,
{
  pub fn new(members: Arc<M>, policy: Arc<P>, mirror: Arc<C>) -> Self {
    Self { members, policy, mirror }
  }

  /// Apply `user` for membership in `program` under `nickname`.
  ///
  /// An unknown program is a caller error; everything else comes back as
  /// an [`ApplyOutcome`].
  pub async fn apply(
    &self,
    program:  &ProgramId,
    user:     &UserId,
    nickname: &str,
  ) -> Result<ApplyOutcome, EngineError<M::Error>> {
    let nickname = match validate_nickname(nickname) {
      Ok(n) => n,
      Err(reason) => return Ok(ApplyOutcome::InvalidNickname(reason)),
    };

    let limits = self
      .policy
      .program_limits(program)
      .ok_or_else(|| EngineError::NotFound(format!("unknown program: {program}")))?;

    let application = NewMembership {
      user_id:  user.clone(),
      nickname: nickname.to_owned(),
    };

    let outcome = self
      .members
      .apply(program, application, &limits)
      .await
      .map_err(EngineError::Store)?;

    Ok(match outcome {
      AdmissionOutcome::Admitted(membership) => {
        // Mirror failure never rolls back the membership.
        if let Err(e) = self.mirror.member_enrolled(&membership).await {
          tracing::warn!(
            program = %program,
            user = %user,
            error = %e,
            "content mirror update failed after enrollment"
          );
        }
        ApplyOutcome::Admitted(membership)
      }
      AdmissionOutcome::DuplicateApplication => ApplyOutcome::DuplicateApplication,
      AdmissionOutcome::NicknameTaken => ApplyOutcome::NicknameTaken,
      AdmissionOutcome::CapacityReached => ApplyOutcome::CapacityReached,
    })
  }
}

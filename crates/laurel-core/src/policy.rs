//! The reward policy seam.
//!
//! The engine never hard-codes amounts or caps: it asks an injected
//! [`RewardPolicy`] what an action or post type is worth. [`TablePolicy`]
//! is the in-memory implementation used by the server config and by tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{id::ProgramId, membership::ProgramLimits};

// ─── ActionPolicy ────────────────────────────────────────────────────────────

/// What one action (or post type) is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
  /// Points granted per occurrence. Zero means "no reward configured".
  pub amount:             i64,
  /// At most this many grants per user per UTC day. `None` = unlimited.
  #[serde(default)]
  pub daily_cap:          Option<u32>,
  /// Grants expire this many days after creation. `None` = never.
  #[serde(default)]
  pub expires_after_days: Option<u32>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Lookup of reward amounts, daily caps, and program capacities.
///
/// Lookups are synchronous: implementations are expected to hold their
/// tables in memory (loaded from config or refreshed out of band).
pub trait RewardPolicy: Send + Sync {
  /// Policy for a generic action key (e.g. `"comment.write"`).
  fn action_policy(&self, action_key: &str) -> Option<ActionPolicy>;

  /// Policy for a post type (e.g. `"review"`, `"free"`).
  fn post_policy(&self, post_kind: &str) -> Option<ActionPolicy>;

  /// Capacity configuration for a program; `None` = unknown program.
  fn program_limits(&self, program: &ProgramId) -> Option<ProgramLimits>;
}

// ─── TablePolicy ─────────────────────────────────────────────────────────────

/// Static policy tables, deserialisable straight from the server config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablePolicy {
  #[serde(default)]
  pub actions:  HashMap<String, ActionPolicy>,
  #[serde(default)]
  pub posts:    HashMap<String, ActionPolicy>,
  #[serde(default)]
  pub programs: HashMap<String, ProgramLimits>,
}

impl TablePolicy {
  pub fn with_action(mut self, key: &str, policy: ActionPolicy) -> Self {
    self.actions.insert(key.to_owned(), policy);
    self
  }

  pub fn with_post(mut self, kind: &str, policy: ActionPolicy) -> Self {
    self.posts.insert(kind.to_owned(), policy);
    self
  }

  pub fn with_program(mut self, id: &str, limits: ProgramLimits) -> Self {
    self.programs.insert(id.to_owned(), limits);
    self
  }
}

impl RewardPolicy for TablePolicy {
  fn action_policy(&self, action_key: &str) -> Option<ActionPolicy> {
    self.actions.get(action_key).copied()
  }

  fn post_policy(&self, post_kind: &str) -> Option<ActionPolicy> {
    self.posts.get(post_kind).copied()
  }

  fn program_limits(&self, program: &ProgramId) -> Option<ProgramLimits> {
    self.programs.get(program.as_str()).copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_lookup() {
    let policy = TablePolicy::default()
      .with_action("comment.write", ActionPolicy {
        amount:             5,
        daily_cap:          Some(3),
        expires_after_days: None,
      })
      .with_program("supporters", ProgramLimits {
        capacity:         100,
        enforce_capacity: true,
      });

    assert_eq!(policy.action_policy("comment.write").unwrap().amount, 5);
    assert!(policy.action_policy("unknown").is_none());
    assert_eq!(
      policy
        .program_limits(&ProgramId::from("supporters"))
        .unwrap()
        .capacity,
      100
    );
  }

  #[test]
  fn deserialises_from_toml_shaped_config() {
    let json = serde_json::json!({
      "actions": { "post.write": { "amount": 10, "daily_cap": 2 } },
      "programs": { "beta": { "capacity": 50 } }
    });
    let policy: TablePolicy = serde_json::from_value(json).unwrap();
    assert_eq!(policy.action_policy("post.write").unwrap().daily_cap, Some(2));
    // enforce_capacity defaults to true when omitted.
    assert!(
      policy
        .program_limits(&ProgramId::from("beta"))
        .unwrap()
        .enforce_capacity
    );
  }
}

//! The laurel reward engine.
//!
//! Four pieces, each generic over the `laurel-core` trait seams:
//!
//! - [`grant::RewardEngine`] — computes reward amounts from the injected
//!   policy and performs the idempotent ledger writes.
//! - [`retry::RewardShell`] — wraps grants with bounded retries and
//!   degrades terminal failures into durable pending records. Callers of
//!   the shell can never fail because of the reward subsystem.
//! - [`admission::AdmissionController`] — transactional first-come
//!   enrollment into capacity-limited programs.
//! - [`fanout::Broadcaster`] — rate-limited reward-and-notify fan-out
//!   over large recipient sets with per-class failure reporting.

pub mod admission;
pub mod fanout;
pub mod grant;
pub mod noop;
pub mod retry;

#[cfg(test)]
pub(crate) mod testutil;

pub use grant::{EngineError, GrantOutcome, PostRef, RewardEngine};
pub use retry::{RetryPolicy, RewardShell, ShellOutcome};

//! The best-effort content-mirror seam.
//!
//! The CMS that renders program pages and announcement status is a separate
//! system. It is updated after the fact; a mirror failure is logged by the
//! caller and never rolls back the primary operation.

use std::future::Future;

use crate::{gateway::BroadcastReport, membership::Membership};

pub trait ContentMirror: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Reflect a freshly created membership on the program page.
  fn member_enrolled(
    &self,
    membership: &Membership,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Write a broadcast's final status back to the initiating record.
  fn broadcast_finished(
    &self,
    broadcast_id: &str,
    report:       &BroadcastReport,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

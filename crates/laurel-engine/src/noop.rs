//! In-tree stand-ins for the external delivery and CMS collaborators.
//!
//! The real push transport and content mirror live outside this system.
//! These implementations let the server run without them: deliveries are
//! logged and reported successful, mirror writes are swallowed.

use std::convert::Infallible;

use laurel_core::{
  gateway::{BroadcastReport, DeliveryReport, Message, PushGateway},
  id::UserId,
  membership::Membership,
  mirror::ContentMirror,
};

/// Gateway that logs instead of delivering. Every recipient is reported
/// as delivered.
pub struct TracingGateway;

impl PushGateway for TracingGateway {
  async fn deliver(&self, recipients: &[UserId], message: &Message) -> DeliveryReport {
    tracing::info!(
      recipients = recipients.len(),
      kind = ?message.kind,
      title = %message.title,
      "push delivery (log only)"
    );
    DeliveryReport {
      delivered: recipients.to_vec(),
      failed:    Vec::new(),
    }
  }
}

/// Mirror that accepts every write and does nothing.
pub struct NoopMirror;

impl ContentMirror for NoopMirror {
  type Error = Infallible;

  async fn member_enrolled(&self, _membership: &Membership) -> Result<(), Infallible> {
    Ok(())
  }

  async fn broadcast_finished(
    &self,
    _broadcast_id: &str,
    _report:       &BroadcastReport,
  ) -> Result<(), Infallible> {
    Ok(())
  }
}

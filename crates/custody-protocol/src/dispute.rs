//! The dispute overlay: raise, claim for resolution, resolve.

use chrono::Utc;
use custody_core::{
  Error, Result,
  actor::Actor,
  handoff::{Dispute, Handoff},
  notification::MessageTransport,
  status::HandoffStatus,
  store::CustodyStore,
};
use uuid::Uuid;

use crate::{Custody, request::DisputeInput};

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  /// Raise a dispute on an open handoff. Only the sending party may do so.
  ///
  /// An outstanding confirmation token is revoked; a disputed handoff can
  /// only leave the overlay through [`Custody::resolve`].
  pub async fn dispute(
    &self,
    actor: &Actor,
    handoff_id: Uuid,
    input: DisputeInput,
  ) -> Result<Handoff> {
    let now = Utc::now();
    let mut handoff = self.load_current(handoff_id, now).await?;

    if !actor.in_company(handoff.company_id) {
      return Err(Error::Forbidden("handoff belongs to another company".into()));
    }
    if !handoff.sender.is_account(actor.account_id) {
      return Err(Error::Forbidden("only the sending party may raise a dispute".into()));
    }
    if !handoff.status.accepts_dispute() {
      return Err(Error::InvalidTransition { action: "dispute", status: handoff.status });
    }
    let description = input.description.trim();
    if description.is_empty() {
      return Err(Error::Validation("a dispute needs a description".into()));
    }

    handoff.dispute = Some(Dispute {
      raised_by:      actor.account_id,
      raised_by_role: actor.role,
      reason:         input.reason,
      description:    description.to_string(),
      evidence:       input.evidence,
      raised_at:      now,
      resolved_by:    None,
      resolution:     None,
      resolved_at:    None,
    });
    handoff.status = HandoffStatus::Disputed;
    handoff.token = None;
    handoff.refresh(now);

    let handoff = self.save(handoff).await?;
    tracing::warn!(
      handoff = %handoff.number,
      reason = %input.reason,
      raised_by = %actor.account_id,
      "handoff disputed"
    );
    Ok(handoff)
  }

  /// A supervisor takes ownership of a dispute: `disputed` to `resolving`.
  pub async fn start_resolution(&self, actor: &Actor, handoff_id: Uuid) -> Result<Handoff> {
    let now = Utc::now();
    let mut handoff = self.load_current(handoff_id, now).await?;
    authorize_resolver(actor, &handoff)?;

    if handoff.status != HandoffStatus::Disputed {
      return Err(Error::InvalidTransition { action: "claim", status: handoff.status });
    }
    handoff.status = HandoffStatus::Resolving;
    handoff.refresh(now);

    let handoff = self.save(handoff).await?;
    tracing::info!(handoff = %handoff.number, supervisor = %actor.account_id, "dispute claimed");
    Ok(handoff)
  }

  /// Close a dispute with a written resolution.
  pub async fn resolve(
    &self,
    actor: &Actor,
    handoff_id: Uuid,
    resolution: &str,
  ) -> Result<Handoff> {
    let now = Utc::now();
    let mut handoff = self.load_current(handoff_id, now).await?;
    authorize_resolver(actor, &handoff)?;

    if !handoff.status.accepts_resolution() {
      return Err(Error::InvalidTransition { action: "resolve", status: handoff.status });
    }
    let resolution = resolution.trim();
    if resolution.is_empty() {
      return Err(Error::Validation("a resolution needs a description".into()));
    }

    if let Some(dispute) = handoff.dispute.as_mut() {
      dispute.resolved_by = Some(actor.account_id);
      dispute.resolution = Some(resolution.to_string());
      dispute.resolved_at = Some(now);
    }
    handoff.status = HandoffStatus::Resolved;
    handoff.refresh(now);

    let handoff = self.save(handoff).await?;
    tracing::info!(handoff = %handoff.number, supervisor = %actor.account_id, "dispute resolved");
    Ok(handoff)
  }
}

fn authorize_resolver(actor: &Actor, handoff: &Handoff) -> Result<()> {
  if !actor.is_supervisory() {
    return Err(Error::Forbidden("disputes are handled by supervisors".into()));
  }
  if !actor.in_company(handoff.company_id) {
    return Err(Error::Forbidden("handoff belongs to another company".into()));
  }
  Ok(())
}

//! Party attestation: in-app confirmation and remote confirmation by token.

use chrono::{DateTime, Utc};
use custody_core::{
  Error, Result,
  actor::Actor,
  handoff::{Handoff, PublicSummary, WeightReading},
  notification::MessageTransport,
  party::Side,
  status::HandoffStatus,
  store::CustodyStore,
  token,
};
use uuid::Uuid;

use crate::{Custody, request::ConfirmInput};

/// Tries for an in-app confirmation before a lost race is reported.
const CONFIRM_ATTEMPTS: u32 = 3;

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  /// Record the caller's attestation as sender or receiver.
  ///
  /// Confirming twice as the same party is a no-op that returns the current
  /// state. Supervisors may stand in for the receiving party when the
  /// configuration allows it. A write that loses a race with another
  /// attestation is re-applied on the fresh state.
  pub async fn confirm(
    &self,
    actor: &Actor,
    handoff_id: Uuid,
    input: ConfirmInput,
  ) -> Result<Handoff> {
    let mut attempts = 0;
    loop {
      attempts += 1;
      match self.try_confirm(actor, handoff_id, &input).await {
        Err(Error::StaleWrite(number)) if attempts < CONFIRM_ATTEMPTS => {
          tracing::debug!(handoff = %number, attempts, "confirmation raced, retrying");
        }
        result => return result,
      }
    }
  }

  async fn try_confirm(
    &self,
    actor: &Actor,
    handoff_id: Uuid,
    input: &ConfirmInput,
  ) -> Result<Handoff> {
    let now = Utc::now();
    let mut handoff = self.load_current(handoff_id, now).await?;

    if !actor.in_company(handoff.company_id) {
      return Err(Error::Forbidden("handoff belongs to another company".into()));
    }
    if !handoff.status.accepts_confirmation() {
      return Err(Error::InvalidTransition { action: "confirm", status: handoff.status });
    }
    let side = self.side_of(actor, &handoff)?;

    if !input.weights.is_empty() && side == Side::Sender {
      return Err(Error::Validation(
        "confirmed weights are recorded by the receiving party".into(),
      ));
    }
    if handoff.party(side).has_confirmed() {
      if handoff.status == HandoffStatus::Completed {
        self.advance_session(&handoff, now).await?;
      }
      return Ok(handoff);
    }

    apply_readings(&mut handoff, &input.weights)?;
    handoff.attest(side, now);
    if side == Side::Receiver {
      handoff.token = None;
    }

    let handoff = self.save(handoff).await?;
    tracing::info!(
      handoff = %handoff.number,
      side = ?side,
      account = %actor.account_id,
      status = %handoff.status,
      "handoff confirmed"
    );
    self.after_attestation(&handoff, now).await?;
    Ok(handoff)
  }

  /// Confirm receipt with a remote confirmation secret.
  ///
  /// The token is single-use. Unknown, consumed, and expired secrets fail
  /// identically with [`Error::InvalidToken`].
  pub async fn confirm_by_token(
    &self,
    secret: &str,
    weights: &[WeightReading],
  ) -> Result<PublicSummary> {
    let now = Utc::now();
    let mut handoff = self.redeemable(secret, now).await?;

    apply_readings(&mut handoff, weights)?;
    handoff.attest(Side::Receiver, now);
    handoff.token = None;
    handoff.refresh(now);

    let handoff = match self.save(handoff).await {
      Ok(h) => h,
      Err(Error::StaleWrite(number)) => {
        tracing::warn!(handoff = %number, "token redeemed concurrently");
        return Err(Error::InvalidToken);
      }
      Err(e) => return Err(e),
    };
    tracing::info!(
      handoff = %handoff.number,
      status = %handoff.status,
      "handoff confirmed by token"
    );
    self.after_attestation(&handoff, now).await?;
    Ok(PublicSummary::from(&handoff))
  }

  /// What an unauthenticated holder of a valid secret may see.
  pub async fn public_summary(&self, secret: &str) -> Result<PublicSummary> {
    let handoff = self.redeemable(secret, Utc::now()).await?;
    Ok(PublicSummary::from(&handoff))
  }

  /// Resolve a secret to a handoff that can still be confirmed with it.
  async fn redeemable(&self, secret: &str, now: DateTime<Utc>) -> Result<Handoff> {
    let hash = token::hash_secret(secret);
    let Some(handoff) = self
      .store
      .find_by_token_hash(hash, now)
      .await
      .map_err(Error::store)?
    else {
      tracing::warn!("confirmation attempted with unknown or expired token");
      return Err(Error::InvalidToken);
    };

    let handoff = self.expire_if_overdue(handoff, now).await?;
    let valid = handoff.status.accepts_confirmation()
      && !handoff.receiver.has_confirmed()
      && handoff.token.as_ref().is_some_and(|t| t.verify(secret, now));
    if !valid {
      tracing::warn!(handoff = %handoff.number, "confirmation token rejected");
      return Err(Error::InvalidToken);
    }
    Ok(handoff)
  }

  fn side_of(&self, actor: &Actor, handoff: &Handoff) -> Result<Side> {
    if handoff.sender.is_account(actor.account_id) {
      Ok(Side::Sender)
    } else if handoff.receiver.is_account(actor.account_id) {
      Ok(Side::Receiver)
    } else if actor.is_supervisory() && self.config.allow_supervisor_standin {
      Ok(Side::Receiver)
    } else {
      Err(Error::Forbidden("caller is not a party to this handoff".into()))
    }
  }

  async fn after_attestation(&self, handoff: &Handoff, now: DateTime<Utc>) -> Result<()> {
    if handoff.status == HandoffStatus::Completed {
      tracing::info!(handoff = %handoff.number, "handoff completed");
      self.advance_session(handoff, now).await?;
    }
    Ok(())
  }
}

fn apply_readings(handoff: &mut Handoff, readings: &[WeightReading]) -> Result<()> {
  if let Some(bad) = readings.iter().find(|r| !r.weight.is_finite() || r.weight < 0.0) {
    return Err(Error::Validation(format!(
      "weight for container {} must be a non-negative number",
      bad.container_id
    )));
  }
  let unknown = handoff.apply_weights(readings);
  if let Some(id) = unknown.first() {
    return Err(Error::Validation(format!("container {id} is not part of this handoff")));
  }
  Ok(())
}

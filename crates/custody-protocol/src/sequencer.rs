//! Chain sequencer: decides whether a step may begin for a session and
//! assigns its chain id and sequence number.

use chrono::{DateTime, Utc};
use custody_core::{
  Error, Result,
  handoff::{CHAIN_PREFIX, HANDOFF_PREFIX, Handoff, HandoffType, daily_id},
  notification::MessageTransport,
  registry::CollectionSession,
  status::HandoffStatus,
  store::CustodyStore,
};
use uuid::Uuid;

use crate::Custody;

/// Where a new handoff sits in its session's chain.
#[derive(Debug, Clone)]
pub(crate) struct ChainSlot {
  pub chain_id: String,
  pub sequence: u8,
  /// The completed step-1 handoff, when beginning step 2.
  pub step_one: Option<Handoff>,
}

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  /// Validate ordering and uniqueness for `kind` in `session`, mint the chain
  /// id on first use, and move the session's stage forward.
  ///
  /// The duplicate checks here give a precise error on the common path; the
  /// store's unique index still arbitrates concurrent creators.
  pub(crate) async fn begin_chain(
    &self,
    mut session: CollectionSession,
    kind: HandoffType,
    now: DateTime<Utc>,
  ) -> Result<ChainSlot> {
    let session_id = session.session_id;

    let step_one = match kind {
      HandoffType::FacilityToDriver => {
        if self.active_step(session_id, kind, now).await?.is_some() {
          return Err(Error::DuplicateStep { session_id, handoff_type: kind });
        }
        None
      }
      HandoffType::DriverToIncinerator => {
        let step_one = self
          .active_step(session_id, HandoffType::FacilityToDriver, now)
          .await?
          .filter(|h| h.status == HandoffStatus::Completed)
          .ok_or(Error::StepOneIncomplete(session_id))?;
        if self.active_step(session_id, kind, now).await?.is_some() {
          return Err(Error::DuplicateStep { session_id, handoff_type: kind });
        }
        Some(step_one)
      }
    };

    let chain_id = match session.chain_id.clone() {
      Some(id) => id,
      None => {
        let id = self.mint_id(CHAIN_PREFIX, now).await?;
        tracing::info!(session_id = %session_id, chain_id = %id, "chain started");
        session.chain_id = Some(id.clone());
        id
      }
    };

    session.chain_stage = session.chain_stage.max(kind.stage_on_begin());
    session.updated_at = now;
    self
      .store
      .update_session(session)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::StaleWrite(format!("session {session_id}")))?;

    Ok(ChainSlot { chain_id, sequence: kind.sequence(), step_one })
  }

  /// The session's non-expired step of `kind`. An overdue step is expired
  /// on the spot and no longer occupies its slot.
  async fn active_step(
    &self,
    session_id: Uuid,
    kind: HandoffType,
    now: DateTime<Utc>,
  ) -> Result<Option<Handoff>> {
    let found = self
      .store
      .find_active_step(session_id, kind)
      .await
      .map_err(Error::store)?;
    match found {
      Some(h) => {
        let h = self.expire_if_overdue(h, now).await?;
        Ok((h.status != HandoffStatus::Expired).then_some(h))
      }
      None => Ok(None),
    }
  }

  /// Next date-scoped id for `prefix`.
  pub(crate) async fn mint_id(&self, prefix: &'static str, now: DateTime<Utc>) -> Result<String> {
    let day = now.date_naive();
    let n = self
      .store
      .next_daily_number(prefix, day)
      .await
      .map_err(Error::store)?;
    Ok(daily_id(prefix, day, n))
  }

  /// Next handoff number.
  pub(crate) async fn mint_number(&self, now: DateTime<Utc>) -> Result<String> {
    self.mint_id(HANDOFF_PREFIX, now).await
  }

  /// Move a session forward after one of its handoffs completed.
  ///
  /// Retries a few times on concurrent session updates; the stage only moves
  /// forward, so a retry that finds it already advanced stops.
  pub(crate) async fn advance_session(&self, handoff: &Handoff, now: DateTime<Utc>) -> Result<()> {
    let Some(session_id) = handoff.session_id else {
      return Ok(());
    };
    let target = handoff.handoff_type.stage_on_complete();

    for _ in 0..3 {
      let mut session = self
        .store
        .get_session(session_id)
        .await
        .map_err(Error::store)?
        .ok_or(Error::SessionNotFound(session_id))?;
      if session.chain_stage >= target {
        return Ok(());
      }
      session.chain_stage = target;
      session.updated_at = now;
      if self
        .store
        .update_session(session)
        .await
        .map_err(Error::store)?
        .is_some()
      {
        tracing::info!(session_id = %session_id, stage = %target, "chain advanced");
        return Ok(());
      }
    }
    Err(Error::StaleWrite(format!("session {session_id}")))
  }
}

//! Scoped reads: single handoff, listings, a session's chain, and the
//! notification audit trail.

use chrono::Utc;
use custody_core::{
  Error, Result,
  actor::{Actor, ActorRole},
  handoff::{ChainView, Handoff},
  notification::{MessageTransport, NotificationLog},
  store::{CustodyStore, HandoffQuery},
};
use uuid::Uuid;

use crate::{Custody, request::ListFilter};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

fn page_size(limit: Option<usize>) -> usize {
  limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
}

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  pub async fn get(&self, actor: &Actor, handoff_id: Uuid) -> Result<Handoff> {
    let handoff = self.load_current(handoff_id, Utc::now()).await?;
    if !actor.can_view(&handoff) {
      return Err(Error::Forbidden("handoff is outside the caller's scope".into()));
    }
    Ok(handoff)
  }

  /// Look a handoff up by id or by its human-readable number.
  pub async fn get_by_reference(&self, actor: &Actor, reference: &str) -> Result<Handoff> {
    if let Ok(id) = Uuid::parse_str(reference) {
      return self.get(actor, id).await;
    }
    let handoff = self
      .store
      .get_handoff_by_number(reference.to_string())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::HandoffNotFound(reference.to_string()))?;
    let handoff = self.expire_if_overdue(handoff, Utc::now()).await?;
    if !actor.can_view(&handoff) {
      return Err(Error::Forbidden("handoff is outside the caller's scope".into()));
    }
    Ok(handoff)
  }

  /// List handoffs visible to the caller, newest first.
  ///
  /// Administrators may narrow to any company; everyone else is pinned to
  /// their own. Drivers only see handoffs they are a party to.
  pub async fn list(&self, actor: &Actor, filter: ListFilter) -> Result<Vec<Handoff>> {
    let company_id = if actor.is_admin() {
      filter.company_id
    } else {
      Some(actor.company_id)
    };
    let party_account = (actor.role == ActorRole::Driver).then_some(actor.account_id);

    let query = HandoffQuery {
      company_id,
      party_account,
      session_id: filter.session_id,
      status: filter.status,
      handoff_type: filter.handoff_type,
      limit: Some(page_size(filter.limit)),
      offset: filter.offset,
    };
    self.store.list_handoffs(&query).await.map_err(Error::store)
  }

  /// A session's chain id, stage, and the handoffs the caller may see.
  pub async fn chain(&self, actor: &Actor, session_id: Uuid) -> Result<ChainView> {
    let session = self
      .store
      .get_session(session_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SessionNotFound(session_id))?;
    if !actor.in_company(session.company_id) {
      return Err(Error::Forbidden("session belongs to another company".into()));
    }

    let handoffs = self
      .store
      .session_handoffs(session_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .filter(|h| actor.can_view(h))
      .collect();

    Ok(ChainView {
      session_id,
      chain_id: session.chain_id,
      chain_stage: session.chain_stage,
      handoffs,
    })
  }

  /// Notification attempts for a handoff, newest first.
  pub async fn notifications(
    &self,
    actor: &Actor,
    handoff_id: Uuid,
    limit: Option<usize>,
    offset: Option<usize>,
  ) -> Result<Vec<NotificationLog>> {
    if !actor.is_supervisory() {
      return Err(Error::Forbidden("notification history is for supervisors".into()));
    }
    let handoff = self
      .store
      .get_handoff(handoff_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::HandoffNotFound(handoff_id.to_string()))?;
    if !actor.in_company(handoff.company_id) {
      return Err(Error::Forbidden("handoff belongs to another company".into()));
    }

    self
      .store
      .list_notifications(handoff_id, page_size(limit), offset.unwrap_or(0))
      .await
      .map_err(Error::store)
  }
}

//! The chain-of-custody handoff protocol.
//!
//! [`Custody`] ties a [`CustodyStore`] and a [`MessageTransport`] together and
//! exposes every protocol operation: creating handoffs through the chain
//! sequencer, party confirmation, remote confirmation by token, notification
//! dispatch, and the dispute overlay.
//!
//! The protocol holds no locks. Concurrent writers are arbitrated by the
//! store: active-step uniqueness is an index, and every update is
//! conditional on the version that was read.

mod confirm;
mod create;
mod dispatch;
mod dispute;
mod query;
mod sequencer;

pub mod config;
pub mod request;

pub use config::ProtocolConfig;

use chrono::{DateTime, Utc};
use custody_core::{
  Error, Result,
  handoff::Handoff,
  notification::MessageTransport,
  store::CustodyStore,
};
use uuid::Uuid;

/// The protocol service.
pub struct Custody<S, T> {
  store:     S,
  transport: T,
  config:    ProtocolConfig,
}

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  pub fn new(store: S, transport: T, config: ProtocolConfig) -> Self {
    Self { store, transport, config }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &ProtocolConfig { &self.config }

  /// Load a handoff, persisting `expired` first if its expiry has passed.
  async fn load_current(&self, id: Uuid, now: DateTime<Utc>) -> Result<Handoff> {
    let handoff = self
      .store
      .get_handoff(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::HandoffNotFound(id.to_string()))?;
    self.expire_if_overdue(handoff, now).await
  }

  async fn expire_if_overdue(&self, mut handoff: Handoff, now: DateTime<Utc>) -> Result<Handoff> {
    if !handoff.is_overdue(now) {
      return Ok(handoff);
    }
    handoff.expire(now);
    tracing::info!(handoff = %handoff.number, "handoff expired");
    self.save(handoff).await
  }

  /// Persist a mutated handoff; a lost race is a conflict.
  async fn save(&self, handoff: Handoff) -> Result<Handoff> {
    let number = handoff.number.clone();
    self
      .store
      .update_handoff(handoff)
      .await
      .map_err(Error::store)?
      .ok_or(Error::StaleWrite(number))
  }

  /// Mark every open handoff whose expiry has passed as `expired`.
  ///
  /// Returns the number of handoffs expired. Handoffs that were modified
  /// concurrently are skipped and picked up by the next sweep.
  pub async fn expire_overdue(&self) -> Result<usize> {
    let now = Utc::now();
    let overdue = self.store.overdue_handoffs(now).await.map_err(Error::store)?;

    let mut expired = 0;
    for mut handoff in overdue {
      handoff.expire(now);
      match self.store.update_handoff(handoff).await.map_err(Error::store)? {
        Some(h) => {
          tracing::info!(handoff = %h.number, "handoff expired");
          expired += 1;
        }
        None => tracing::debug!("skipped concurrently modified handoff during sweep"),
      }
    }
    Ok(expired)
  }
}

#[cfg(test)]
mod tests;

//! The `CustodyStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `custody-store-sqlite`).
//! The protocol layer depends on this abstraction, not on any concrete
//! backend. Domain outcomes that a backend can detect atomically (a
//! duplicate active step, a stale version) are returned as values, not
//! errors, so the protocol can map them onto its own conflict variants.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
  handoff::{Handoff, HandoffType},
  notification::{ChannelKind, NotificationLog},
  registry::{CollectionSession, Container, Plant},
  status::HandoffStatus,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`CustodyStore::list_handoffs`].
#[derive(Debug, Clone, Default)]
pub struct HandoffQuery {
  /// Restrict to one company.
  pub company_id:    Option<Uuid>,
  /// Restrict to handoffs where this account is sender or receiver.
  pub party_account: Option<Uuid>,
  pub session_id:    Option<Uuid>,
  pub status:        Option<HandoffStatus>,
  pub handoff_type:  Option<HandoffType>,
  pub limit:         Option<usize>,
  pub offset:        Option<usize>,
}

/// Result of [`CustodyStore::insert_handoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
  Created,
  /// The session already holds a non-expired handoff of this type.
  DuplicateActiveStep,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a custody store backend.
///
/// Updates are conditional on the `version` of the record passed in; on
/// success the store returns the record with its version bumped, and on a
/// lost race it returns `None` and writes nothing.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait CustodyStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reference data ────────────────────────────────────────────────────

  fn insert_session(
    &self,
    session: CollectionSession,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_session(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<CollectionSession>, Self::Error>> + Send + '_;

  /// Write the session's chain fields if `session.version` is current.
  fn update_session(
    &self,
    session: CollectionSession,
  ) -> impl Future<Output = Result<Option<CollectionSession>, Self::Error>> + Send + '_;

  fn insert_container(
    &self,
    container: Container,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_container(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Container>, Self::Error>> + Send + '_;

  fn insert_plant(
    &self,
    plant: Plant,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_plant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Plant>, Self::Error>> + Send + '_;

  /// Atomically increment and return the counter for `(scope, day)`,
  /// starting at 1.
  fn next_daily_number(
    &self,
    scope: &'static str,
    day: NaiveDate,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  // ── Handoffs ──────────────────────────────────────────────────────────

  /// Insert a new handoff. The uniqueness of active steps per session is
  /// enforced here, atomically.
  fn insert_handoff(
    &self,
    handoff: Handoff,
  ) -> impl Future<Output = Result<Inserted, Self::Error>> + Send + '_;

  /// Persist a mutated handoff if `handoff.version` is current.
  fn update_handoff(
    &self,
    handoff: Handoff,
  ) -> impl Future<Output = Result<Option<Handoff>, Self::Error>> + Send + '_;

  fn get_handoff(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Handoff>, Self::Error>> + Send + '_;

  fn get_handoff_by_number(
    &self,
    number: String,
  ) -> impl Future<Output = Result<Option<Handoff>, Self::Error>> + Send + '_;

  /// Find the handoff whose stored token hash equals `hash` and whose token
  /// has not expired at `now`.
  fn find_by_token_hash(
    &self,
    hash: String,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Handoff>, Self::Error>> + Send + '_;

  /// The session's non-expired handoff of `handoff_type`, if any.
  fn find_active_step(
    &self,
    session_id: Uuid,
    handoff_type: HandoffType,
  ) -> impl Future<Output = Result<Option<Handoff>, Self::Error>> + Send + '_;

  fn list_handoffs<'a>(
    &'a self,
    query: &'a HandoffQuery,
  ) -> impl Future<Output = Result<Vec<Handoff>, Self::Error>> + Send + 'a;

  /// All handoffs of a session, ordered by sequence then creation time.
  fn session_handoffs(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Handoff>, Self::Error>> + Send + '_;

  /// Open handoffs whose overall expiry is at or before `now`.
  fn overdue_handoffs(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Handoff>, Self::Error>> + Send + '_;

  // ── Notification audit ────────────────────────────────────────────────

  /// Append a log entry. Entries are never updated or deleted.
  fn insert_notification(
    &self,
    log: NotificationLog,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Log entries for a handoff, newest first.
  fn list_notifications(
    &self,
    handoff_id: Uuid,
    limit: usize,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<NotificationLog>, Self::Error>> + Send + '_;

  /// Number of attempts already logged on `channel` for a handoff.
  fn count_notifications(
    &self,
    handoff_id: Uuid,
    channel: ChannelKind,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;
}

//! Handoff: one attested transfer of containers between two parties.
//!
//! A handoff is never deleted. It is mutated only by confirm, dispute,
//! resolve, resend and expiry, and each of those goes through
//! [`Handoff::refresh`] so totals and status can never drift from the data
//! they are derived from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  actor::ActorRole,
  party::{Party, Side},
  registry::{ChainStage, WasteClass},
  status::{HandoffStatus, derive_status},
  token::TokenDigest,
};

// ─── Type & sequence ─────────────────────────────────────────────────────────

/// The two steps of the custody chain.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HandoffType {
  FacilityToDriver,
  DriverToIncinerator,
}

impl HandoffType {
  /// Position within the chain: 1 or 2.
  pub fn sequence(self) -> u8 {
    match self {
      Self::FacilityToDriver => 1,
      Self::DriverToIncinerator => 2,
    }
  }

  pub fn from_sequence(sequence: u8) -> Option<Self> {
    match sequence {
      1 => Some(Self::FacilityToDriver),
      2 => Some(Self::DriverToIncinerator),
      _ => None,
    }
  }

  /// Chain stage a session enters when this step begins.
  pub fn stage_on_begin(self) -> ChainStage {
    match self {
      Self::FacilityToDriver => ChainStage::FacilityToDriver,
      Self::DriverToIncinerator => ChainStage::DriverToIncinerator,
    }
  }

  /// Chain stage a session enters when this step completes.
  pub fn stage_on_complete(self) -> ChainStage {
    match self {
      Self::FacilityToDriver => ChainStage::DriverToIncinerator,
      Self::DriverToIncinerator => ChainStage::Completed,
    }
  }
}

// ─── Line items ──────────────────────────────────────────────────────────────

/// One container in a handoff's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerLine {
  pub container_id:     Uuid,
  pub waste_class:      WasteClass,
  /// Percentage, 0–100.
  pub fill_level:       u8,
  /// Weight in kilograms as asserted by the sender.
  pub declared_weight:  Option<f64>,
  /// Weight in kilograms as asserted by the receiver.
  pub confirmed_weight: Option<f64>,
  pub bag_count:        u32,
  pub notes:            Option<String>,
}

/// Aggregates over the line items. Never accepted from callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
  pub container_count:  u32,
  pub declared_weight:  f64,
  pub confirmed_weight: f64,
}

impl Totals {
  pub fn from_lines(lines: &[ContainerLine]) -> Self {
    lines.iter().fold(Self::default(), |mut acc, line| {
      acc.container_count += 1;
      acc.declared_weight += line.declared_weight.unwrap_or(0.0);
      acc.confirmed_weight += line.confirmed_weight.unwrap_or(0.0);
      acc
    })
  }
}

/// A receiver-asserted weight for one container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
  pub container_id: Uuid,
  pub weight:       f64,
}

// ─── Dispute ─────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DisputeReason {
  WeightMismatch,
  MissingContainers,
  DamagedContainers,
  WrongWasteClass,
  Other,
}

/// Dispute overlay. Resolver fields stay empty until a supervisor resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
  pub raised_by:      Uuid,
  pub raised_by_role: ActorRole,
  pub reason:         DisputeReason,
  pub description:    String,
  /// Opaque references (photo ids, document URLs).
  pub evidence:       Vec<String>,
  pub raised_at:      DateTime<Utc>,
  pub resolved_by:    Option<Uuid>,
  pub resolution:     Option<String>,
  pub resolved_at:    Option<DateTime<Utc>>,
}

// ─── Handoff ─────────────────────────────────────────────────────────────────

/// One custody-transfer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
  pub handoff_id:   Uuid,
  /// Human-readable, date-scoped id, e.g. `HO-20260314-0007`.
  pub number:       String,
  /// Shared by both steps of one chain; absent for session-less handoffs.
  pub chain_id:     Option<String>,
  pub handoff_type: HandoffType,
  pub sequence:     u8,
  pub company_id:   Uuid,
  pub session_id:   Option<Uuid>,
  pub facility_id:  Option<Uuid>,
  pub plant_id:     Option<Uuid>,
  pub sender:       Party,
  pub receiver:     Party,
  pub containers:   Vec<ContainerLine>,
  pub totals:       Totals,
  pub status:       HandoffStatus,
  /// Present only while a remote confirmation link is outstanding.
  #[serde(skip_serializing)]
  pub token:        Option<TokenDigest>,
  pub dispute:      Option<Dispute>,
  pub completed_at: Option<DateTime<Utc>>,
  pub expires_at:   DateTime<Utc>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  /// Optimistic-concurrency counter; bumped by every store update.
  pub version:      u32,
}

impl Handoff {
  pub fn party(&self, side: Side) -> &Party {
    match side {
      Side::Sender => &self.sender,
      Side::Receiver => &self.receiver,
    }
  }

  fn party_mut(&mut self, side: Side) -> &mut Party {
    match side {
      Side::Sender => &mut self.sender,
      Side::Receiver => &mut self.receiver,
    }
  }

  /// Re-derive totals and attestation status. Every write path ends here.
  ///
  /// The dispute overlay and `expired` are sticky: attestation changes never
  /// move a handoff out of them.
  pub fn refresh(&mut self, now: DateTime<Utc>) {
    self.totals = Totals::from_lines(&self.containers);

    if !self.status.in_dispute() && !self.status.is_terminal() {
      let derived =
        derive_status(self.sender.confirmed_at, self.receiver.confirmed_at);
      self.status = match (self.status, derived) {
        (HandoffStatus::Created, HandoffStatus::Pending) => HandoffStatus::Created,
        (_, derived) => derived,
      };
    }

    if self.status == HandoffStatus::Completed && self.completed_at.is_none() {
      self.completed_at = Some(now);
    }
    self.updated_at = now;
  }

  /// Stamp one party's attestation. Returns `false` if that party had
  /// already confirmed, in which case nothing changes.
  pub fn attest(&mut self, side: Side, now: DateTime<Utc>) -> bool {
    let party = self.party_mut(side);
    if party.confirmed_at.is_some() {
      return false;
    }
    party.confirmed_at = Some(now);
    self.refresh(now);
    true
  }

  /// Record receiver-asserted weights. Unknown container ids are returned.
  pub fn apply_weights(&mut self, readings: &[WeightReading]) -> Vec<Uuid> {
    let mut unknown = Vec::new();
    for reading in readings {
      match self
        .containers
        .iter_mut()
        .find(|l| l.container_id == reading.container_id)
      {
        Some(line) => line.confirmed_weight = Some(reading.weight),
        None => unknown.push(reading.container_id),
      }
    }
    unknown
  }

  /// The receiver has been told about this handoff.
  pub fn mark_notified(&mut self, now: DateTime<Utc>) {
    if self.status == HandoffStatus::Created {
      self.status = HandoffStatus::Pending;
    }
    self.refresh(now);
  }

  /// Whether the overall expiry has passed for an open handoff. Disputed
  /// handoffs stay open until a supervisor resolves them.
  pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
    !self.status.is_terminal() && !self.status.in_dispute() && now >= self.expires_at
  }

  /// Move to the terminal `expired` status and drop any outstanding token.
  pub fn expire(&mut self, now: DateTime<Utc>) {
    self.status = HandoffStatus::Expired;
    self.token = None;
    self.refresh(now);
  }

  /// Declared weight of a container in this handoff, if any.
  pub fn declared_weight_of(&self, container_id: Uuid) -> Option<f64> {
    self
      .containers
      .iter()
      .find(|l| l.container_id == container_id)
      .and_then(|l| l.declared_weight)
  }
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Prefix for handoff numbers.
pub const HANDOFF_PREFIX: &str = "HO";
/// Prefix for chain ids.
pub const CHAIN_PREFIX: &str = "CH";

/// Format a date-scoped id: `<prefix>-YYYYMMDD-NNNN`.
pub fn daily_id(prefix: &str, day: NaiveDate, n: u32) -> String {
  format!("{prefix}-{}-{n:04}", day.format("%Y%m%d"))
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// A session's chain: id, stage, and handoffs ordered by sequence then
/// creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainView {
  pub session_id:  Uuid,
  pub chain_id:    Option<String>,
  pub chain_stage: ChainStage,
  pub handoffs:    Vec<Handoff>,
}

/// Public line item: no notes, no receiver-side data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicContainer {
  pub container_id:    Uuid,
  pub waste_class:     WasteClass,
  pub fill_level:      u8,
  pub declared_weight: Option<f64>,
  pub bag_count:       u32,
}

/// What an unauthenticated token holder may see: no party identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicSummary {
  pub number:       String,
  pub chain_id:     Option<String>,
  pub handoff_type: HandoffType,
  pub containers:   Vec<PublicContainer>,
  pub totals:       Totals,
  pub status:       HandoffStatus,
  pub expires_at:   Option<DateTime<Utc>>,
}

impl From<&Handoff> for PublicSummary {
  fn from(h: &Handoff) -> Self {
    Self {
      number:       h.number.clone(),
      chain_id:     h.chain_id.clone(),
      handoff_type: h.handoff_type,
      containers:   h
        .containers
        .iter()
        .map(|l| PublicContainer {
          container_id:    l.container_id,
          waste_class:     l.waste_class,
          fill_level:      l.fill_level,
          declared_weight: l.declared_weight,
          bag_count:       l.bag_count,
        })
        .collect(),
      totals:       h.totals,
      status:       h.status,
      expires_at:   h.token.as_ref().map(|t| t.expires_at),
    }
  }
}

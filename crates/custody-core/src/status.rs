//! Handoff status and the confirmation state machine.
//!
//! Status is a pure function of the two attestation timestamps, overlaid by
//! the dispute branch and the terminal `expired` marker. It is persisted for
//! queryability, but every write path recomputes it through
//! [`crate::handoff::Handoff::refresh`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle status of a handoff.
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
pub enum HandoffStatus {
  /// Persisted, receiver not yet notified.
  Created,
  Pending,
  ConfirmedBySender,
  ConfirmedByReceiver,
  Completed,
  Disputed,
  /// A supervisor has claimed the dispute and is working on it.
  Resolving,
  Resolved,
  Expired,
}

impl HandoffStatus {
  /// No transition leaves a terminal status.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Resolved | Self::Expired)
  }

  /// `disputed` or `resolving`.
  pub fn in_dispute(self) -> bool {
    matches!(self, Self::Disputed | Self::Resolving)
  }

  /// Statuses in which either party may still attest.
  pub fn accepts_confirmation(self) -> bool {
    !self.is_terminal() && !self.in_dispute()
  }

  /// A dispute may be raised from any open, undisputed status.
  pub fn accepts_dispute(self) -> bool { self.accepts_confirmation() }

  /// Statuses from which a resolution may be recorded.
  pub fn accepts_resolution(self) -> bool { self.in_dispute() }
}

/// Derive the attestation status from the two confirmation timestamps.
pub fn derive_status(
  sender_confirmed_at: Option<DateTime<Utc>>,
  receiver_confirmed_at: Option<DateTime<Utc>>,
) -> HandoffStatus {
  match (sender_confirmed_at, receiver_confirmed_at) {
    (None, None) => HandoffStatus::Pending,
    (Some(_), None) => HandoffStatus::ConfirmedBySender,
    (None, Some(_)) => HandoffStatus::ConfirmedByReceiver,
    (Some(_), Some(_)) => HandoffStatus::Completed,
  }
}

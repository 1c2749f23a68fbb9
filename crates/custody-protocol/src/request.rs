//! Inputs and outputs of protocol operations.

use custody_core::{
  handoff::{DisputeReason, Handoff, HandoffType, WeightReading},
  notification::NotificationLog,
  registry::WasteClass,
  status::HandoffStatus,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Create ──────────────────────────────────────────────────────────────────

/// A container in a create request: either a bare id, resolved against the
/// container registry, or a full line item.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContainerInput {
  Id(Uuid),
  Line(LineInput),
}

impl ContainerInput {
  pub fn container_id(&self) -> Uuid {
    match self {
      Self::Id(id) => *id,
      Self::Line(line) => line.container_id,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineInput {
  pub container_id:    Uuid,
  /// Defaults to the registered container's class.
  pub waste_class:     Option<WasteClass>,
  pub fill_level:      Option<u8>,
  pub declared_weight: Option<f64>,
  pub bag_count:       Option<u32>,
  pub notes:           Option<String>,
}

/// Who should receive the containers, when it differs from the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiverInput {
  pub account_id: Option<Uuid>,
  pub name:       Option<String>,
  pub phone:      Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHandoff {
  pub handoff_type: HandoffType,
  pub session_id:   Option<Uuid>,
  pub containers:   Vec<ContainerInput>,
  pub facility_id:  Option<Uuid>,
  pub plant_id:     Option<Uuid>,
  pub receiver:     Option<ReceiverInput>,
  /// Display name for the sending party; defaults to the caller's name.
  pub sender_name:  Option<String>,
}

/// Result of a create. The secret is returned here and nowhere else.
#[derive(Debug, Clone, Serialize)]
pub struct Created {
  pub handoff:             Handoff,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confirmation_secret: Option<String>,
  pub notifications:       Vec<NotificationLog>,
}

/// Result of a resend.
#[derive(Debug, Clone, Serialize)]
pub struct Dispatched {
  pub handoff:       Handoff,
  pub notifications: Vec<NotificationLog>,
}

// ─── Confirm / dispute ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmInput {
  /// Receiver-asserted weights; rejected when confirming as sender.
  #[serde(default)]
  pub weights: Vec<WeightReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputeInput {
  pub reason:      DisputeReason,
  pub description: String,
  #[serde(default)]
  pub evidence:    Vec<String>,
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
  pub session_id:   Option<Uuid>,
  pub status:       Option<HandoffStatus>,
  pub handoff_type: Option<HandoffType>,
  /// Ignored for non-administrators, who are pinned to their own company.
  pub company_id:   Option<Uuid>,
  pub limit:        Option<usize>,
  pub offset:       Option<usize>,
}

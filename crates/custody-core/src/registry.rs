//! Reference data owned by the surrounding system: collection sessions,
//! physical containers, and incineration plants.
//!
//! The protocol reads all three and writes only the session's chain fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ─── Chain stage ─────────────────────────────────────────────────────────────

/// How far a session's custody chain has progressed.
///
/// Variants are declared in chain order; a session's stage only moves forward.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChainStage {
  #[default]
  NotStarted,
  FacilityToDriver,
  DriverToIncinerator,
  Completed,
}

// ─── Collection session ──────────────────────────────────────────────────────

/// A driver's collection run. Owns at most one custody chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSession {
  pub session_id:   Uuid,
  pub company_id:   Uuid,
  pub driver_id:    Uuid,
  pub driver_name:  String,
  pub driver_phone: Option<String>,
  /// Minted on the first handoff; shared by both steps.
  pub chain_id:     Option<String>,
  pub chain_stage:  ChainStage,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  /// Optimistic-concurrency counter; bumped by every store update.
  pub version:      u32,
}

impl CollectionSession {
  pub fn new(company_id: Uuid, driver_id: Uuid, driver_name: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      session_id: Uuid::new_v4(),
      company_id,
      driver_id,
      driver_name: driver_name.into(),
      driver_phone: None,
      chain_id: None,
      chain_stage: ChainStage::NotStarted,
      created_at: now,
      updated_at: now,
      version: 0,
    }
  }
}

// ─── Containers ──────────────────────────────────────────────────────────────

/// Regulatory waste classification of a container's contents.
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
pub enum WasteClass {
  Infectious,
  Pathological,
  Sharps,
  Pharmaceutical,
  Chemical,
  Other,
}

/// A physical, reusable waste container (bin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
  pub container_id: Uuid,
  pub company_id:   Uuid,
  /// Printed label, e.g. `BIN-0042`.
  pub code:         String,
  pub waste_class:  WasteClass,
}

// ─── Plants ──────────────────────────────────────────────────────────────────

/// An incineration plant that receives step-2 handoffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
  pub plant_id:      Uuid,
  pub name:          String,
  /// Contact person on site; falls back to the plant name.
  pub operator_name: Option<String>,
  pub phone:         Option<String>,
}

//! Sender and receiver parties.
//!
//! Both ends of a handoff share one shape; only the role tag tells them
//! apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// What a party does in the custody chain.
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
pub enum PartyRole {
  Facility,
  Driver,
  IncineratorOperator,
  Supervisor,
}

/// Which end of the handoff a party sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
  Sender,
  Receiver,
}

/// One end of a custody transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
  /// Account reference; absent for accountless parties (plant staff).
  pub account_id:   Option<Uuid>,
  pub role:         PartyRole,
  pub name:         String,
  pub phone:        Option<String>,
  /// Attestation timestamp; `None` until this party confirms.
  pub confirmed_at: Option<DateTime<Utc>>,
}

impl Party {
  pub fn new(role: PartyRole, name: impl Into<String>) -> Self {
    Self {
      account_id: None,
      role,
      name: name.into(),
      phone: None,
      confirmed_at: None,
    }
  }

  pub fn with_account(mut self, account_id: Uuid) -> Self {
    self.account_id = Some(account_id);
    self
  }

  pub fn with_phone(mut self, phone: Option<String>) -> Self {
    self.phone = phone;
    self
  }

  pub fn is_account(&self, account_id: Uuid) -> bool {
    self.account_id == Some(account_id)
  }

  pub fn has_confirmed(&self) -> bool { self.confirmed_at.is_some() }
}

//! The caller identity supplied by the (external) identity layer.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::handoff::Handoff;

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
pub enum ActorRole {
  Admin,
  Supervisor,
  Driver,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
  pub account_id: Uuid,
  pub role:       ActorRole,
  pub company_id: Uuid,
  pub name:       String,
}

impl Actor {
  pub fn is_admin(&self) -> bool { self.role == ActorRole::Admin }

  /// Supervisors and administrators.
  pub fn is_supervisory(&self) -> bool {
    matches!(self.role, ActorRole::Admin | ActorRole::Supervisor)
  }

  /// Administrators see everything; everyone else is confined to their
  /// company.
  pub fn in_company(&self, company_id: Uuid) -> bool {
    self.is_admin() || self.company_id == company_id
  }

  /// Read visibility: company scope, and drivers only where they are a
  /// named party.
  pub fn can_view(&self, handoff: &Handoff) -> bool {
    if !self.in_company(handoff.company_id) {
      return false;
    }
    match self.role {
      ActorRole::Driver => {
        handoff.sender.is_account(self.account_id)
          || handoff.receiver.is_account(self.account_id)
      }
      _ => true,
    }
  }
}

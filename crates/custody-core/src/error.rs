//! Error types for `custody-core`.
//!
//! Variants follow the protocol's rejection taxonomy: validation,
//! authorization, not-found, conflict, and token errors. Every rejection
//! leaves stored state untouched.

use thiserror::Error;
use uuid::Uuid;

use crate::{
  handoff::HandoffType,
  status::HandoffStatus,
};

#[derive(Debug, Error)]
pub enum Error {
  // ── Validation ────────────────────────────────────────────────────────
  #[error("invalid request: {0}")]
  Validation(String),

  // ── Authorization ─────────────────────────────────────────────────────
  #[error("forbidden: {0}")]
  Forbidden(String),

  // ── Not found ─────────────────────────────────────────────────────────
  #[error("handoff not found: {0}")]
  HandoffNotFound(String),

  #[error("collection session not found: {0}")]
  SessionNotFound(Uuid),

  #[error("container not found: {0}")]
  ContainerNotFound(Uuid),

  #[error("plant not found: {0}")]
  PlantNotFound(Uuid),

  /// Unknown, consumed, and expired confirmation tokens all map here so
  /// callers cannot tell them apart.
  #[error("confirmation link is invalid or has expired")]
  InvalidToken,

  // ── Conflict ──────────────────────────────────────────────────────────
  #[error("session {session_id} already has an active {handoff_type} handoff")]
  DuplicateStep {
    session_id:   Uuid,
    handoff_type: HandoffType,
  },

  #[error("session {0} has no completed facility-to-driver handoff")]
  StepOneIncomplete(Uuid),

  #[error("cannot {action} a handoff in status {status}")]
  InvalidTransition {
    action: &'static str,
    status: HandoffStatus,
  },

  #[error("{0} was modified concurrently; reload and retry")]
  StaleWrite(String),

  // ── Infrastructure ────────────────────────────────────────────────────
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// `true` for the conflict family (HTTP 409).
  pub fn is_conflict(&self) -> bool {
    matches!(
      self,
      Self::DuplicateStep { .. }
        | Self::StepOneIncomplete(_)
        | Self::InvalidTransition { .. }
        | Self::StaleWrite(_)
    )
  }

  /// `true` for the not-found family, including token failures.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::HandoffNotFound(_)
        | Self::SessionNotFound(_)
        | Self::ContainerNotFound(_)
        | Self::PlantNotFound(_)
        | Self::InvalidToken
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

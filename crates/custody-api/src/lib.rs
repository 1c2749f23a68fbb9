//! JSON REST API for the custody protocol.
//!
//! Exposes an axum [`Router`] backed by any [`CustodyStore`] and
//! [`MessageTransport`]. Authentication is the caller's responsibility: the
//! identity layer in front of this router forwards the authenticated
//! account in `x-actor-*` headers (see [`actor`]).
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", custody_api::router(state))
//! ```

pub mod actor;
pub mod error;
pub mod handoffs;
pub mod public;
pub mod rate_limit;
pub mod sessions;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use custody_core::{notification::MessageTransport, store::CustodyStore};
use custody_protocol::Custody;

pub use error::ApiError;
use rate_limit::{HasLimits, PublicLimits};

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S, T> {
  pub custody: Arc<Custody<S, T>>,
  pub limits:  Arc<PublicLimits>,
}

impl<S, T> Clone for AppState<S, T> {
  fn clone(&self) -> Self {
    Self {
      custody: Arc::clone(&self.custody),
      limits:  Arc::clone(&self.limits),
    }
  }
}

impl<S, T> HasLimits for AppState<S, T> {
  fn limits(&self) -> &PublicLimits { &self.limits }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn router<S, T>(state: AppState<S, T>) -> Router<()>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Router::new()
    // Handoffs
    .route("/handoffs", get(handoffs::list::<S, T>).post(handoffs::create::<S, T>))
    .route("/handoffs/{id}", get(handoffs::get_one::<S, T>))
    .route("/handoffs/{id}/confirm", post(handoffs::confirm::<S, T>))
    .route("/handoffs/{id}/dispute", post(handoffs::dispute::<S, T>))
    .route("/handoffs/{id}/resolution", post(handoffs::start_resolution::<S, T>))
    .route("/handoffs/{id}/resolve", post(handoffs::resolve::<S, T>))
    .route("/handoffs/{id}/resend", post(handoffs::resend::<S, T>))
    .route("/handoffs/{id}/notifications", get(handoffs::notifications::<S, T>))
    // Sessions
    .route("/sessions/{id}/chain", get(sessions::chain::<S, T>))
    // Public token endpoints
    .route("/public/handoffs/{token}", get(public::summary::<S, T>))
    .route("/public/handoffs/{token}/confirm", post(public::confirm::<S, T>))
    .with_state(state)
}

//! Unauthenticated token endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/public/handoffs/{token}` | Restricted summary |
//! | `POST` | `/public/handoffs/{token}/confirm` | Optional body: `{"weights":[...]}` |
//!
//! Both are rate-limited per token and per caller address. Every failure
//! past the limiter is the same 404.

use axum::{
  Json,
  extract::{Path, State},
};
use custody_core::{
  handoff::{PublicSummary, WeightReading},
  notification::MessageTransport,
  store::CustodyStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError, rate_limit::CallerAddr};

/// `GET /public/handoffs/{token}`
pub async fn summary<S, T>(
  State(state): State<AppState<S, T>>,
  CallerAddr(addr): CallerAddr,
  Path(secret): Path<String>,
) -> Result<Json<PublicSummary>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  state.limits.check(&secret, addr)?;
  Ok(Json(state.custody.public_summary(&secret).await?))
}

#[derive(Debug, Deserialize)]
pub struct PublicConfirmBody {
  #[serde(default)]
  pub weights: Vec<WeightReading>,
}

/// `POST /public/handoffs/{token}/confirm`
pub async fn confirm<S, T>(
  State(state): State<AppState<S, T>>,
  CallerAddr(addr): CallerAddr,
  Path(secret): Path<String>,
  body: Option<Json<PublicConfirmBody>>,
) -> Result<Json<PublicSummary>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  state.limits.check(&secret, addr)?;
  let weights = body.map(|Json(b)| b.weights).unwrap_or_default();
  Ok(Json(state.custody.confirm_by_token(&secret, &weights).await?))
}

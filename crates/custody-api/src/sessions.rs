//! Handler for `GET /sessions/{id}/chain`.

use axum::{
  Json,
  extract::{Path, State},
};
use custody_core::{handoff::ChainView, notification::MessageTransport, store::CustodyStore};
use uuid::Uuid;

use crate::{AppState, actor::Caller, error::ApiError};

/// `GET /sessions/{id}/chain`: chain id, stage, and the visible handoffs
/// ordered by sequence.
pub async fn chain<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(session_id): Path<Uuid>,
) -> Result<Json<ChainView>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.chain(&actor, session_id).await?))
}

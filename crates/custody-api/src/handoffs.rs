//! Handlers for `/handoffs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/handoffs` | Body: [`CreateHandoff`]; returns 201 + [`Created`] |
//! | `GET`  | `/handoffs` | Optional `session_id`, `status`, `handoff_type`, `company_id`, `limit`, `offset` |
//! | `GET`  | `/handoffs/{id}` | Id or human-readable number |
//! | `POST` | `/handoffs/{id}/confirm` | Body: `{"weights":[...]}` |
//! | `POST` | `/handoffs/{id}/dispute` | Body: [`DisputeInput`] |
//! | `POST` | `/handoffs/{id}/resolution` | Supervisor claims the dispute |
//! | `POST` | `/handoffs/{id}/resolve` | Body: `{"resolution":"..."}` |
//! | `POST` | `/handoffs/{id}/resend` | Re-notify the receiver |
//! | `GET`  | `/handoffs/{id}/notifications` | `?limit`, `?offset` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use custody_core::{
  handoff::Handoff,
  notification::{MessageTransport, NotificationLog},
  store::CustodyStore,
};
use custody_protocol::request::{
  ConfirmInput, CreateHandoff, Created, Dispatched, DisputeInput, ListFilter,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, actor::Caller, error::ApiError};

// ─── Create ──────────────────────────────────────────────────────────────────

/// `POST /handoffs`: returns 201 + [`Created`].
pub async fn create<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Json(body): Json<CreateHandoff>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  let created: Created = state.custody.create_handoff(&actor, body).await?;
  Ok((StatusCode::CREATED, Json(created)))
}

// ─── Read ────────────────────────────────────────────────────────────────────

/// `GET /handoffs[?session_id=..][&status=..][&limit=..]`
pub async fn list<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Handoff>>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.list(&actor, filter).await?))
}

/// `GET /handoffs/{id}`
pub async fn get_one<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(reference): Path<String>,
) -> Result<Json<Handoff>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.get_by_reference(&actor, &reference).await?))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

/// `GET /handoffs/{id}/notifications`
pub async fn notifications<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(id): Path<Uuid>,
  Query(page): Query<PageParams>,
) -> Result<Json<Vec<NotificationLog>>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  let logs = state
    .custody
    .notifications(&actor, id, page.limit, page.offset)
    .await?;
  Ok(Json(logs))
}

// ─── Attestation ─────────────────────────────────────────────────────────────

/// `POST /handoffs/{id}/confirm`
pub async fn confirm<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(id): Path<Uuid>,
  Json(body): Json<ConfirmInput>,
) -> Result<Json<Handoff>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.confirm(&actor, id, body).await?))
}

/// `POST /handoffs/{id}/resend`
pub async fn resend<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Dispatched>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.resend(&actor, id).await?))
}

// ─── Disputes ────────────────────────────────────────────────────────────────

/// `POST /handoffs/{id}/dispute`
pub async fn dispute<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(id): Path<Uuid>,
  Json(body): Json<DisputeInput>,
) -> Result<Json<Handoff>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.dispute(&actor, id, body).await?))
}

/// `POST /handoffs/{id}/resolution`
pub async fn start_resolution<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Handoff>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.start_resolution(&actor, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  pub resolution: String,
}

/// `POST /handoffs/{id}/resolve`
pub async fn resolve<S, T>(
  State(state): State<AppState<S, T>>,
  Caller(actor): Caller,
  Path(id): Path<Uuid>,
  Json(body): Json<ResolveBody>,
) -> Result<Json<Handoff>, ApiError>
where
  S: CustodyStore + 'static,
  T: MessageTransport + 'static,
{
  Ok(Json(state.custody.resolve(&actor, id, &body.resolution).await?))
}

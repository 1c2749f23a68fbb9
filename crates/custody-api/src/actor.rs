//! Caller identity extractor.
//!
//! Authentication happens upstream; the identity layer forwards the
//! authenticated account in `x-actor-*` headers.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use custody_core::actor::{Actor, ActorRole};
use uuid::Uuid;

use crate::error::ApiError;

pub const ACTOR_ID: &str = "x-actor-id";
pub const ACTOR_ROLE: &str = "x-actor-role";
pub const ACTOR_COMPANY: &str = "x-actor-company";
pub const ACTOR_NAME: &str = "x-actor-name";

/// The authenticated caller. Rejects with 401 when the identity headers are
/// missing or malformed.
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
}

fn parse_uuid(headers: &HeaderMap, name: &str) -> Result<Uuid, ApiError> {
  Uuid::parse_str(header(headers, name)?)
    .map_err(|_| ApiError::Unauthorized(format!("malformed {name} header")))
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
  let account_id = parse_uuid(headers, ACTOR_ID)?;
  let company_id = parse_uuid(headers, ACTOR_COMPANY)?;
  let role: ActorRole = header(headers, ACTOR_ROLE)?
    .parse()
    .map_err(|_| ApiError::Unauthorized(format!("unknown role in {ACTOR_ROLE} header")))?;
  let name = header(headers, ACTOR_NAME)
    .map(str::to_owned)
    .unwrap_or_else(|_| account_id.to_string());

  Ok(Actor { account_id, role, company_id, name })
}

impl<St> FromRequestParts<St> for Caller
where
  St: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
    actor_from_headers(&parts.headers).map(Caller)
  }
}

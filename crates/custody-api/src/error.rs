//! API error type and [`axum::response::IntoResponse`] implementation.

use std::time::Duration;

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use custody_core::Error as CustodyError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("too many attempts; retry in {}s", retry_after_secs(.0))]
  RateLimited(Duration),

  #[error(transparent)]
  Custody(#[from] CustodyError),
}

fn retry_after_secs(wait: &Duration) -> u64 {
  wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
      Self::Custody(e) => match e {
        CustodyError::Validation(_) => StatusCode::BAD_REQUEST,
        CustodyError::Forbidden(_) => StatusCode::FORBIDDEN,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        e if e.is_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }

    let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
    if let Self::RateLimited(wait) = self {
      response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(retry_after_secs(&wait).max(1)),
      );
    }
    response
  }
}

#[cfg(test)]
mod tests {
  use custody_core::{handoff::HandoffType, status::HandoffStatus};
  use uuid::Uuid;

  use super::*;

  #[test]
  fn taxonomy_maps_to_status_codes() {
    let cases = [
      (CustodyError::Validation("x".into()), StatusCode::BAD_REQUEST),
      (CustodyError::Forbidden("x".into()), StatusCode::FORBIDDEN),
      (CustodyError::HandoffNotFound("x".into()), StatusCode::NOT_FOUND),
      (CustodyError::InvalidToken, StatusCode::NOT_FOUND),
      (
        CustodyError::DuplicateStep {
          session_id:   Uuid::nil(),
          handoff_type: HandoffType::FacilityToDriver,
        },
        StatusCode::CONFLICT,
      ),
      (CustodyError::StepOneIncomplete(Uuid::nil()), StatusCode::CONFLICT),
      (
        CustodyError::InvalidTransition { action: "confirm", status: HandoffStatus::Completed },
        StatusCode::CONFLICT,
      ),
      (CustodyError::StaleWrite("HO-1".into()), StatusCode::CONFLICT),
    ];
    for (err, expected) in cases {
      assert_eq!(ApiError::from(err).status(), expected);
    }
  }

  #[test]
  fn rate_limited_sets_retry_after() {
    let resp = ApiError::RateLimited(Duration::from_millis(1500)).into_response();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers()[header::RETRY_AFTER], "2");
  }
}

//! Per-token and per-address rate limiting for the public confirmation
//! endpoints.
//!
//! Each key gets a GCRA bucket that admits `attempts` requests back to back
//! and then refills one slot per `window`, so no key ever gets more than
//! `attempts` tries inside one window.

use std::{
  net::{IpAddr, Ipv4Addr, SocketAddr},
  num::NonZeroU32,
  time::Duration,
};

use axum::{
  extract::{ConnectInfo, FromRequestParts},
  http::request::Parts,
};
use custody_core::token;
use governor::{
  DefaultKeyedRateLimiter, Quota, RateLimiter,
  clock::{Clock, DefaultClock},
};

use crate::error::ApiError;

/// Limits applied to unauthenticated token endpoints.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
  pub attempts:            u32,
  pub window:              Duration,
  /// Key on the first `x-forwarded-for` hop instead of the socket peer.
  pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      attempts:            5,
      window:              Duration::from_secs(15 * 60),
      trust_forwarded_for: false,
    }
  }
}

impl RateLimitConfig {
  fn quota(&self) -> Quota {
    let burst = NonZeroU32::MIN.saturating_add(self.attempts.saturating_sub(1));
    Quota::with_period(self.window)
      .map(|q| q.allow_burst(burst))
      .unwrap_or_else(|| Quota::per_second(burst))
  }
}

/// Shared limiter state.
pub struct PublicLimits {
  by_token:            DefaultKeyedRateLimiter<String>,
  by_addr:             DefaultKeyedRateLimiter<IpAddr>,
  trust_forwarded_for: bool,
}

impl PublicLimits {
  pub fn new(config: &RateLimitConfig) -> Self {
    let quota = config.quota();
    Self {
      by_token:            RateLimiter::keyed(quota),
      by_addr:             RateLimiter::keyed(quota),
      trust_forwarded_for: config.trust_forwarded_for,
    }
  }

  /// Count one attempt for `secret` from `addr`.
  ///
  /// Tokens are keyed by their hash so raw secrets never sit in memory
  /// longer than the request.
  pub fn check(&self, secret: &str, addr: IpAddr) -> Result<(), ApiError> {
    if let Err(not_until) = self.by_addr.check_key(&addr) {
      tracing::warn!(%addr, "public endpoint rate limit hit for address");
      let now = Clock::now(&DefaultClock::default());
      return Err(ApiError::RateLimited(not_until.wait_time_from(now)));
    }

    let key = token::hash_secret(secret);
    if let Err(not_until) = self.by_token.check_key(&key) {
      tracing::warn!(
        token = &key[..key.len().min(12)],
        "public endpoint rate limit hit for token"
      );
      let now = Clock::now(&DefaultClock::default());
      return Err(ApiError::RateLimited(not_until.wait_time_from(now)));
    }
    Ok(())
  }

  /// Forget keys whose buckets have fully refilled.
  pub fn prune(&self) {
    self.by_token.retain_recent();
    self.by_addr.retain_recent();
    self.by_token.shrink_to_fit();
    self.by_addr.shrink_to_fit();
    tracing::debug!(
      tokens = self.by_token.len(),
      addresses = self.by_addr.len(),
      "rate limiter pruned"
    );
  }

  fn caller_addr(&self, parts: &Parts) -> IpAddr {
    let forwarded = || {
      parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    let peer = parts
      .extensions
      .get::<ConnectInfo<SocketAddr>>()
      .map(|ConnectInfo(addr)| addr.ip());

    let addr = if self.trust_forwarded_for {
      forwarded().or(peer)
    } else {
      peer.or_else(forwarded)
    };
    addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
  }
}

/// Network address of the caller, for rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct CallerAddr(pub IpAddr);

/// Anything that carries the public limiter.
pub trait HasLimits {
  fn limits(&self) -> &PublicLimits;
}

impl<St> FromRequestParts<St> for CallerAddr
where
  St: HasLimits + Send + Sync,
{
  type Rejection = std::convert::Infallible;

  async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
    Ok(CallerAddr(state.limits().caller_addr(parts)))
  }
}

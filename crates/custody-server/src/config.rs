//! Server configuration, deserialised from `custody.toml` and `CUSTODY_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use chrono::TimeDelta;
use custody_api::rate_limit::RateLimitConfig;
use custody_core::notification::ChannelKind;
use custody_protocol::ProtocolConfig;
use serde::Deserialize;

/// Runtime server configuration. Every key has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                     String,
  pub port:                     u16,
  pub store_path:               PathBuf,
  pub public_base_url:          String,
  pub token_ttl_hours:          i64,
  pub handoff_ttl_hours:        i64,
  pub channels:                 Vec<ChannelKind>,
  pub allow_supervisor_standin: bool,
  /// When set, outbound messages are POSTed here; otherwise they are only
  /// logged.
  pub notify_webhook_url:       Option<String>,
  /// Seconds between expiry sweeps; `0` disables the sweep.
  pub expiry_sweep_secs:        u64,
  pub rate_limit_attempts:      u32,
  pub rate_limit_window_secs:   u64,
  pub trust_forwarded_for:      bool,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                     "127.0.0.1".to_string(),
      port:                     8080,
      store_path:               PathBuf::from("custody.db"),
      public_base_url:          "http://localhost:8080".to_string(),
      token_ttl_hours:          24,
      handoff_ttl_hours:        72,
      channels:                 vec![ChannelKind::Sms, ChannelKind::Whatsapp],
      allow_supervisor_standin: true,
      notify_webhook_url:       None,
      expiry_sweep_secs:        300,
      rate_limit_attempts:      5,
      rate_limit_window_secs:   900,
      trust_forwarded_for:      false,
    }
  }
}

impl ServerConfig {
  /// Reject settings the protocol cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.token_ttl_hours <= 0 {
      bail!("token_ttl_hours must be positive, got {}", self.token_ttl_hours);
    }
    if self.handoff_ttl_hours <= 0 {
      bail!("handoff_ttl_hours must be positive, got {}", self.handoff_ttl_hours);
    }
    if self.channels.is_empty() {
      bail!("at least one notification channel must be configured");
    }
    if self.rate_limit_attempts == 0 || self.rate_limit_window_secs == 0 {
      bail!("rate_limit_attempts and rate_limit_window_secs must be positive");
    }
    Ok(())
  }

  pub fn protocol(&self) -> ProtocolConfig {
    ProtocolConfig {
      token_ttl:                TimeDelta::hours(self.token_ttl_hours),
      handoff_ttl:              TimeDelta::hours(self.handoff_ttl_hours),
      channels:                 self.channels.clone(),
      public_base_url:          self.public_base_url.clone(),
      allow_supervisor_standin: self.allow_supervisor_standin,
    }
  }

  pub fn rate_limit(&self) -> RateLimitConfig {
    RateLimitConfig {
      attempts:            self.rate_limit_attempts,
      window:              Duration::from_secs(self.rate_limit_window_secs),
      trust_forwarded_for: self.trust_forwarded_for,
    }
  }

  pub fn sweep_interval(&self) -> Option<Duration> {
    (self.expiry_sweep_secs > 0).then(|| Duration::from_secs(self.expiry_sweep_secs))
  }
}

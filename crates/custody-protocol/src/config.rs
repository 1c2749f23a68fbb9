//! Protocol tunables.

use chrono::TimeDelta;
use custody_core::{notification::ChannelKind, token};

/// Settings that change protocol behaviour.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
  /// Validity of a remote confirmation token.
  pub token_ttl:                TimeDelta,
  /// Overall lifetime of a handoff before it expires.
  pub handoff_ttl:              TimeDelta,
  /// Channels tried, in order, for every dispatch.
  pub channels:                 Vec<ChannelKind>,
  /// Prefix of confirmation links, e.g. `https://custody.example.org`.
  pub public_base_url:          String,
  /// Let supervisors and administrators confirm as the receiving party
  /// without being named on the handoff.
  pub allow_supervisor_standin: bool,
}

impl Default for ProtocolConfig {
  fn default() -> Self {
    Self {
      token_ttl:                token::default_ttl(),
      handoff_ttl:              TimeDelta::hours(72),
      channels:                 vec![ChannelKind::Sms, ChannelKind::Whatsapp],
      public_base_url:          "http://localhost:8080".to_string(),
      allow_supervisor_standin: true,
    }
  }
}

impl ProtocolConfig {
  /// Public link a remote receiver opens to confirm. It points at the
  /// public summary route; confirming is a POST to `{link}/confirm`.
  pub fn confirmation_link(&self, secret: &str) -> String {
    format!("{}/public/handoffs/{secret}", self.public_base_url.trim_end_matches('/'))
  }

  /// The confirmation link as it is kept in the audit log, with the secret
  /// replaced by its digest fingerprint.
  pub fn redacted_link(&self, fingerprint: &str) -> String {
    self.confirmation_link(&format!("[token {fingerprint}]"))
  }
}

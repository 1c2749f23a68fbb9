//! Outbound notifications: the transport contract and the audit log.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// A delivery channel.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelKind {
  Sms,
  Whatsapp,
  Telegram,
}

/// Outcome of one attempt on one channel.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
  Sent,
  Failed,
}

/// A rendered message addressed to one phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
  pub to:   String,
  pub body: String,
}

/// A channel refused or failed to deliver.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The thin send/fail contract a message provider must satisfy.
///
/// `send` returns the provider's message id on success.
pub trait MessageTransport: Send + Sync {
  fn send<'a>(
    &'a self,
    channel: ChannelKind,
    message: &'a OutboundMessage,
  ) -> impl Future<Output = Result<String, TransportError>> + Send + 'a;
}

/// Append-only audit record of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLog {
  pub log_id:              Uuid,
  pub handoff_id:          Uuid,
  pub recipient_account:   Option<Uuid>,
  pub recipient_phone:     Option<String>,
  pub recipient_name:      String,
  pub channel:             ChannelKind,
  pub status:              DeliveryStatus,
  pub provider_message_id: Option<String>,
  pub content:             String,
  pub failure_reason:      Option<String>,
  /// Number of earlier attempts on this channel for this handoff.
  pub retry_count:         u32,
  pub created_at:          DateTime<Utc>,
  pub sent_at:             Option<DateTime<Utc>>,
}

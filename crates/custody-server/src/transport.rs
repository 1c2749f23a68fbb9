//! Message transports the server can be configured with.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use custody_core::notification::{ChannelKind, MessageTransport, OutboundMessage, TransportError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Forwards every message to an HTTP gateway that fans out to the real
/// SMS/WhatsApp providers.
///
/// The gateway receives `{"channel", "to", "body"}` and should answer 2xx,
/// optionally with `{"message_id": "..."}`.
pub struct WebhookTransport {
  client: Client,
  url:    String,
}

#[derive(Deserialize)]
struct GatewayReply {
  #[serde(alias = "id")]
  message_id: Option<String>,
}

impl WebhookTransport {
  pub fn new(url: impl Into<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, url: url.into() })
  }

  async fn deliver(
    &self,
    channel: ChannelKind,
    message: &OutboundMessage,
  ) -> Result<String, TransportError> {
    let resp = self
      .client
      .post(&self.url)
      .json(&json!({ "channel": channel, "to": message.to, "body": message.body }))
      .send()
      .await
      .map_err(|e| TransportError(format!("gateway unreachable: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
      return Err(TransportError(format!("gateway answered {status}")));
    }
    let reply = resp.json::<GatewayReply>().await.ok();
    Ok(
      reply
        .and_then(|r| r.message_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string()),
    )
  }
}

/// Records dispatches in the log without delivering them. Message bodies
/// carry confirmation links and are not logged.
pub struct LogTransport;

impl LogTransport {
  fn deliver(&self, channel: ChannelKind, message: &OutboundMessage) -> String {
    let id = Uuid::new_v4().to_string();
    tracing::info!(
      %channel,
      to = %message.to,
      chars = message.body.len(),
      message_id = %id,
      "message logged, no webhook configured"
    );
    id
  }
}

/// The configured transport.
pub enum Transport {
  Webhook(WebhookTransport),
  Log(LogTransport),
}

impl Transport {
  pub fn from_url(url: Option<&str>) -> Result<Self> {
    match url {
      Some(url) => Ok(Self::Webhook(WebhookTransport::new(url)?)),
      None => Ok(Self::Log(LogTransport)),
    }
  }
}

impl MessageTransport for Transport {
  fn send<'a>(
    &'a self,
    channel: ChannelKind,
    message: &'a OutboundMessage,
  ) -> impl Future<Output = Result<String, TransportError>> + Send + 'a {
    async move {
      match self {
        Self::Webhook(w) => w.deliver(channel, message).await,
        Self::Log(l) => Ok(l.deliver(channel, message)),
      }
    }
  }
}

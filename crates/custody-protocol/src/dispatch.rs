//! Notification dispatch and resend.
//!
//! Every attempt on every channel is appended to the notification log,
//! whether it was delivered or not. A failing channel never aborts the
//! operation that triggered the dispatch.

use chrono::{DateTime, Utc};
use custody_core::{
  Error, Result,
  actor::Actor,
  handoff::{Handoff, HandoffType},
  notification::{DeliveryStatus, MessageTransport, NotificationLog, OutboundMessage},
  store::CustodyStore,
  token,
};
use uuid::Uuid;

use crate::{Custody, request::Dispatched};

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  /// Notify the receiving party on every configured channel and log each
  /// attempt. The handoff moves from `created` to `pending` once at least
  /// one channel accepted the message.
  pub(crate) async fn notify_receiver(
    &self,
    handoff: Handoff,
    secret: Option<&str>,
  ) -> Result<(Handoff, Vec<NotificationLog>)> {
    let body = self.render(&handoff, secret.map(|s| self.config.confirmation_link(s)));
    // the audit copy never carries the secret
    let logged = match secret {
      Some(_) => {
        let fingerprint = handoff.token.as_ref().map_or("", |t| t.fingerprint());
        self.render(&handoff, Some(self.config.redacted_link(fingerprint)))
      }
      None => body.clone(),
    };
    let mut logs = Vec::with_capacity(self.config.channels.len());

    for &channel in &self.config.channels {
      let now = Utc::now();
      let retry_count = self
        .store
        .count_notifications(handoff.handoff_id, channel)
        .await
        .map_err(Error::store)?;

      let mut log = NotificationLog {
        log_id: Uuid::new_v4(),
        handoff_id: handoff.handoff_id,
        recipient_account: handoff.receiver.account_id,
        recipient_phone: handoff.receiver.phone.clone(),
        recipient_name: handoff.receiver.name.clone(),
        channel,
        status: DeliveryStatus::Failed,
        provider_message_id: None,
        content: logged.clone(),
        failure_reason: None,
        retry_count,
        created_at: now,
        sent_at: None,
      };

      match handoff.receiver.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        None => {
          log.failure_reason = Some("receiver has no phone number".into());
        }
        Some(to) => {
          let message = OutboundMessage { to: to.to_string(), body: body.clone() };
          match self.transport.send(channel, &message).await {
            Ok(provider_id) => {
              log.status = DeliveryStatus::Sent;
              log.provider_message_id = Some(provider_id);
              log.sent_at = Some(Utc::now());
            }
            Err(e) => {
              tracing::warn!(
                handoff = %handoff.number,
                channel = %channel,
                error = %e,
                "notification failed"
              );
              log.failure_reason = Some(e.to_string());
            }
          }
        }
      }

      self
        .store
        .insert_notification(log.clone())
        .await
        .map_err(Error::store)?;
      logs.push(log);
    }

    let delivered = logs.iter().filter(|l| l.status == DeliveryStatus::Sent).count();
    tracing::info!(
      handoff = %handoff.number,
      attempted = logs.len(),
      delivered,
      "receiver notified"
    );

    let handoff = if delivered > 0 {
      self.mark_delivered(handoff, Utc::now()).await?
    } else {
      handoff
    };
    Ok((handoff, logs))
  }

  /// Move `created` to `pending` after a delivery. The messages are already
  /// out, so losing a race here reloads instead of failing the caller.
  async fn mark_delivered(&self, mut handoff: Handoff, now: DateTime<Utc>) -> Result<Handoff> {
    let handoff_id = handoff.handoff_id;
    for _ in 0..3 {
      let before = handoff.status;
      handoff.mark_notified(now);
      if handoff.status == before {
        return Ok(handoff);
      }
      match self.save(handoff).await {
        Ok(saved) => return Ok(saved),
        Err(Error::StaleWrite(number)) => {
          tracing::debug!(handoff = %number, "handoff changed during dispatch, reloading");
          handoff = self
            .store
            .get_handoff(handoff_id)
            .await
            .map_err(Error::store)?
            .ok_or_else(|| Error::HandoffNotFound(handoff_id.to_string()))?;
        }
        Err(e) => return Err(e),
      }
    }
    Ok(handoff)
  }

  /// Notify the receiver again.
  ///
  /// For remote receivers a fresh token replaces the outstanding one, so an
  /// earlier link stops working as soon as the new one is sent.
  pub async fn resend(&self, actor: &Actor, handoff_id: Uuid) -> Result<Dispatched> {
    let now = Utc::now();
    let mut handoff = self.load_current(handoff_id, now).await?;

    if !actor.in_company(handoff.company_id) {
      return Err(Error::Forbidden("handoff belongs to another company".into()));
    }
    if !actor.is_supervisory() && !handoff.sender.is_account(actor.account_id) {
      return Err(Error::Forbidden(
        "only the sender or a supervisor may resend a handoff".into(),
      ));
    }
    if !handoff.status.accepts_confirmation() || handoff.receiver.has_confirmed() {
      return Err(Error::InvalidTransition { action: "resend", status: handoff.status });
    }

    let issued = (handoff.handoff_type == HandoffType::DriverToIncinerator)
      .then(|| token::issue(self.config.token_ttl, now));
    if let Some(issued) = &issued {
      handoff.token = Some(issued.digest.clone());
      handoff.refresh(now);
      handoff = self.save(handoff).await?;
      tracing::info!(
        handoff = %handoff.number,
        token = issued.digest.fingerprint(),
        "confirmation token reissued"
      );
    }

    let (handoff, notifications) = self
      .notify_receiver(handoff, issued.as_ref().map(|t| t.secret.as_str()))
      .await?;
    Ok(Dispatched { handoff, notifications })
  }

  fn render(&self, handoff: &Handoff, link: Option<String>) -> String {
    let totals = &handoff.totals;
    let summary = format!(
      "{}: {} container(s), {:.1} kg declared, from {}.",
      handoff.number, totals.container_count, totals.declared_weight, handoff.sender.name,
    );
    match link {
      Some(link) => format!("{summary} Confirm receipt: {link}"),
      None => format!("{summary} Open the app to confirm receipt."),
    }
  }
}

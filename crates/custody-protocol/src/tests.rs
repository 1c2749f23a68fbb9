//! Protocol tests against an in-memory SQLite store and a scripted
//! transport.

use std::{future::Future, sync::Mutex};

use chrono::{TimeDelta, Utc};
use custody_core::{
  Error,
  actor::{Actor, ActorRole},
  handoff::{DisputeReason, HandoffType, WeightReading},
  notification::{ChannelKind, DeliveryStatus, MessageTransport, OutboundMessage, TransportError},
  party::{PartyRole, Side},
  registry::{ChainStage, CollectionSession, Container, Plant, WasteClass},
  status::HandoffStatus,
  store::CustodyStore,
};
use custody_store_sqlite::SqliteStore;
use uuid::Uuid;

use crate::{
  Custody, ProtocolConfig,
  request::{
    ConfirmInput, ContainerInput, CreateHandoff, Created, DisputeInput, LineInput, ListFilter,
    ReceiverInput,
  },
};

// ─── Fakes & fixtures ────────────────────────────────────────────────────────

/// Delivers on every channel except the ones listed as failing, and keeps
/// what it sent. With `confirm_on` set, the receiver confirms directly in
/// the store while that channel is being sent.
#[derive(Default)]
struct ScriptedTransport {
  failing:    Vec<ChannelKind>,
  sent:       Mutex<Vec<(ChannelKind, OutboundMessage)>>,
  confirm_on: Mutex<Option<(ChannelKind, SqliteStore)>>,
}

impl ScriptedTransport {
  fn failing(channels: &[ChannelKind]) -> Self {
    Self { failing: channels.to_vec(), ..Default::default() }
  }

  /// The secret embedded in the most recent confirmation link.
  fn last_secret(&self) -> String {
    let sent = self.sent.lock().unwrap();
    let (_, message) = sent.last().expect("a message was sent");
    message
      .body
      .rsplit("/public/handoffs/")
      .next()
      .expect("body has a link")
      .to_string()
  }
}

impl MessageTransport for ScriptedTransport {
  fn send<'a>(
    &'a self,
    channel: ChannelKind,
    message: &'a OutboundMessage,
  ) -> impl Future<Output = Result<String, TransportError>> + Send + 'a {
    let racer = self
      .confirm_on
      .lock()
      .unwrap()
      .clone()
      .filter(|(on, _)| *on == channel);
    async move {
      if let Some((_, store)) = racer {
        receiver_confirms_in_store(&store, &message.body).await;
      }
      if self.failing.contains(&channel) {
        return Err(TransportError(format!("{channel} gateway unavailable")));
      }
      let mut sent = self.sent.lock().unwrap();
      sent.push((channel, message.clone()));
      Ok(format!("{channel}-{}", sent.len()))
    }
  }
}

/// Stamp the receiver on the handoff named at the start of `body`, bypassing
/// the protocol.
async fn receiver_confirms_in_store(store: &SqliteStore, body: &str) {
  let number = body.split(':').next().unwrap_or_default().to_string();
  let mut handoff = store.get_handoff_by_number(number).await.unwrap().unwrap();
  handoff.attest(Side::Receiver, Utc::now());
  handoff.token = None;
  store.update_handoff(handoff).await.unwrap().unwrap();
}

type TestCustody = Custody<SqliteStore, ScriptedTransport>;

struct Fixture {
  custody:    TestCustody,
  supervisor: Actor,
  driver:     Actor,
  session:    CollectionSession,
  bin_a:      Uuid,
  bin_b:      Uuid,
  plant:      Uuid,
}

fn actor(role: ActorRole, company_id: Uuid, name: &str) -> Actor {
  Actor { account_id: Uuid::new_v4(), role, company_id, name: name.into() }
}

async fn fixture_with(config: ProtocolConfig, transport: ScriptedTransport) -> Fixture {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let company = Uuid::new_v4();
  let supervisor = actor(ActorRole::Supervisor, company, "Sam Supervisor");
  let driver = actor(ActorRole::Driver, company, "Dana Driver");

  let mut session = CollectionSession::new(company, driver.account_id, "Dana Driver");
  session.driver_phone = Some("+15550001".into());
  store.insert_session(session.clone()).await.unwrap();

  let mut bins = Vec::new();
  for code in ["BIN-A", "BIN-B"] {
    let bin = Container {
      container_id: Uuid::new_v4(),
      company_id:   company,
      code:         code.into(),
      waste_class:  WasteClass::Infectious,
    };
    store.insert_container(bin.clone()).await.unwrap();
    bins.push(bin.container_id);
  }

  let plant = Plant {
    plant_id:      Uuid::new_v4(),
    name:          "North Incineration".into(),
    operator_name: Some("Olu Operator".into()),
    phone:         Some("+15550099".into()),
  };
  store.insert_plant(plant.clone()).await.unwrap();

  Fixture {
    custody: Custody::new(store, transport, config),
    supervisor,
    driver,
    session,
    bin_a: bins[0],
    bin_b: bins[1],
    plant: plant.plant_id,
  }
}

async fn fixture() -> Fixture {
  fixture_with(ProtocolConfig::default(), ScriptedTransport::default()).await
}

fn step_one_request(fx: &Fixture) -> CreateHandoff {
  CreateHandoff {
    handoff_type: HandoffType::FacilityToDriver,
    session_id:   Some(fx.session.session_id),
    containers:   vec![
      ContainerInput::Line(LineInput {
        container_id: fx.bin_a,
        declared_weight: Some(5.0),
        ..Default::default()
      }),
      ContainerInput::Line(LineInput {
        container_id: fx.bin_b,
        declared_weight: Some(3.0),
        ..Default::default()
      }),
    ],
    facility_id:  Some(Uuid::new_v4()),
    plant_id:     None,
    receiver:     None,
    sender_name:  Some("Ward 3".into()),
  }
}

fn step_two_request(fx: &Fixture) -> CreateHandoff {
  CreateHandoff {
    handoff_type: HandoffType::DriverToIncinerator,
    session_id:   Some(fx.session.session_id),
    containers:   vec![ContainerInput::Id(fx.bin_a), ContainerInput::Id(fx.bin_b)],
    facility_id:  None,
    plant_id:     Some(fx.plant),
    receiver:     None,
    sender_name:  None,
  }
}

async fn completed_step_one(fx: &Fixture) -> Uuid {
  let created = fx.custody.create_handoff(&fx.supervisor, step_one_request(fx)).await.unwrap();
  let id = created.handoff.handoff_id;
  fx.custody.confirm(&fx.supervisor, id, ConfirmInput::default()).await.unwrap();
  fx.custody.confirm(&fx.driver, id, ConfirmInput::default()).await.unwrap();
  id
}

async fn step_two(fx: &Fixture) -> Created {
  completed_step_one(fx).await;
  fx.custody.create_handoff(&fx.driver, step_two_request(fx)).await.unwrap()
}

// ─── Chain ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_chain_end_to_end() {
  let fx = fixture().await;

  let created = fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
  let one = created.handoff;
  assert!(created.confirmation_secret.is_none());
  assert!(created.notifications.is_empty());
  assert_eq!(one.status, HandoffStatus::Created);
  assert_eq!(one.sequence, 1);
  assert!(one.number.starts_with("HO-"));
  assert!(one.chain_id.as_deref().is_some_and(|c| c.starts_with("CH-")));
  assert_eq!(one.sender.name, "Ward 3");
  assert_eq!(one.receiver.role, PartyRole::Driver);
  assert!(one.receiver.is_account(fx.driver.account_id));

  let after_sender = fx
    .custody
    .confirm(&fx.supervisor, one.handoff_id, ConfirmInput::default())
    .await
    .unwrap();
  assert_eq!(after_sender.status, HandoffStatus::ConfirmedBySender);

  let done = fx
    .custody
    .confirm(&fx.driver, one.handoff_id, ConfirmInput::default())
    .await
    .unwrap();
  assert_eq!(done.status, HandoffStatus::Completed);
  assert!(done.completed_at.is_some());
  assert_eq!(done.totals.container_count, 2);
  assert_eq!(done.totals.declared_weight, 8.0);

  let session = fx.custody.store().get_session(fx.session.session_id).await.unwrap().unwrap();
  assert_eq!(session.chain_stage, ChainStage::DriverToIncinerator);

  let created = fx.custody.create_handoff(&fx.driver, step_two_request(&fx)).await.unwrap();
  let two = created.handoff;
  assert_eq!(two.sequence, 2);
  assert_eq!(two.chain_id, one.chain_id);
  assert_eq!(two.declared_weight_of(fx.bin_a), Some(5.0));
  assert_eq!(two.declared_weight_of(fx.bin_b), Some(3.0));
  assert_eq!(two.totals.declared_weight, 8.0);
  assert_eq!(two.receiver.role, PartyRole::IncineratorOperator);
  assert_eq!(two.receiver.name, "Olu Operator");
  assert_eq!(two.status, HandoffStatus::Pending);
  assert_eq!(created.notifications.len(), 2);

  let secret = created.confirmation_secret.expect("secret returned once");
  let summary = fx
    .custody
    .confirm_by_token(&secret, &[
      WeightReading { container_id: fx.bin_a, weight: 5.2 },
      WeightReading { container_id: fx.bin_b, weight: 2.9 },
    ])
    .await
    .unwrap();
  assert_eq!(summary.status, HandoffStatus::ConfirmedByReceiver);
  assert!(summary.expires_at.is_none());
  assert!((summary.totals.confirmed_weight - 8.1).abs() < 1e-9);

  let closed = fx
    .custody
    .confirm(&fx.driver, two.handoff_id, ConfirmInput::default())
    .await
    .unwrap();
  assert_eq!(closed.status, HandoffStatus::Completed);

  let chain = fx.custody.chain(&fx.supervisor, fx.session.session_id).await.unwrap();
  assert_eq!(chain.chain_stage, ChainStage::Completed);
  assert_eq!(chain.chain_id, one.chain_id);
  let sequences: Vec<u8> = chain.handoffs.iter().map(|h| h.sequence).collect();
  assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn step_two_requires_completed_step_one() {
  let fx = fixture().await;

  let err = fx.custody.create_handoff(&fx.driver, step_two_request(&fx)).await.unwrap_err();
  assert!(matches!(err, Error::StepOneIncomplete(_)));

  let one = fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
  fx.custody
    .confirm(&fx.supervisor, one.handoff.handoff_id, ConfirmInput::default())
    .await
    .unwrap();

  let err = fx.custody.create_handoff(&fx.driver, step_two_request(&fx)).await.unwrap_err();
  assert!(matches!(err, Error::StepOneIncomplete(_)));
  assert!(err.is_conflict());
}

#[tokio::test]
async fn duplicate_step_leaves_original_untouched() {
  let fx = fixture().await;

  let first = fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
  let id = first.handoff.handoff_id;
  let confirmed = fx.custody.confirm(&fx.supervisor, id, ConfirmInput::default()).await.unwrap();

  let err = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::DuplicateStep { .. }));

  let reloaded = fx.custody.store().get_handoff(id).await.unwrap().unwrap();
  assert_eq!(reloaded.status, HandoffStatus::ConfirmedBySender);
  assert_eq!(reloaded.version, confirmed.version);

  fx.custody.confirm(&fx.driver, id, ConfirmInput::default()).await.unwrap();
  fx.custody.create_handoff(&fx.driver, step_two_request(&fx)).await.unwrap();
  let err = fx.custody.create_handoff(&fx.driver, step_two_request(&fx)).await.unwrap_err();
  assert!(matches!(err, Error::DuplicateStep { handoff_type: HandoffType::DriverToIncinerator, .. }));
}

// ─── Creation rules ──────────────────────────────────────────────────────────

#[tokio::test]
async fn create_rejects_foreign_and_unknown_references() {
  let fx = fixture().await;

  let mut req = step_one_request(&fx);
  req.containers.push(ContainerInput::Id(Uuid::new_v4()));
  let err = fx.custody.create_handoff(&fx.supervisor, req).await.unwrap_err();
  assert!(matches!(err, Error::ContainerNotFound(_)));

  let mut req = step_one_request(&fx);
  req.session_id = Some(Uuid::new_v4());
  let err = fx.custody.create_handoff(&fx.supervisor, req).await.unwrap_err();
  assert!(matches!(err, Error::SessionNotFound(_)));

  let outsider = actor(ActorRole::Supervisor, Uuid::new_v4(), "Other Co");
  let err = fx.custody.create_handoff(&outsider, step_one_request(&fx)).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  let err = fx.custody.create_handoff(&fx.driver, step_one_request(&fx)).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  // Nothing was written by any of the rejections.
  let listed = fx.custody.list(&fx.supervisor, ListFilter::default()).await.unwrap();
  assert!(listed.is_empty());
}

#[tokio::test]
async fn other_drivers_cannot_create_step_two() {
  let fx = fixture().await;
  completed_step_one(&fx).await;

  let other = actor(ActorRole::Driver, fx.session.company_id, "Other Driver");
  let err = fx.custody.create_handoff(&other, step_two_request(&fx)).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  let created = fx.custody.create_handoff(&fx.supervisor, step_two_request(&fx)).await.unwrap();
  assert!(created.handoff.sender.is_account(fx.driver.account_id));
}

#[tokio::test]
async fn explicit_receiver_overrides_plant_contact() {
  let fx = fixture().await;
  completed_step_one(&fx).await;

  let mut req = step_two_request(&fx);
  req.receiver = Some(ReceiverInput {
    account_id: None,
    name:       Some("Night Shift".into()),
    phone:      Some("+15550123".into()),
  });
  let created = fx.custody.create_handoff(&fx.driver, req).await.unwrap();
  assert_eq!(created.handoff.receiver.name, "Night Shift");
  assert_eq!(created.handoff.receiver.phone.as_deref(), Some("+15550123"));

  let sent = fx.custody.transport.sent.lock().unwrap();
  assert!(sent.iter().all(|(_, m)| m.to == "+15550123"));
}

// ─── Confirmation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn confirmation_is_order_independent_and_idempotent() {
  let fx = fixture().await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;

  let first = fx.custody.confirm(&fx.driver, id, ConfirmInput::default()).await.unwrap();
  assert_eq!(first.status, HandoffStatus::ConfirmedByReceiver);

  let again = fx.custody.confirm(&fx.driver, id, ConfirmInput::default()).await.unwrap();
  assert_eq!(again.status, HandoffStatus::ConfirmedByReceiver);
  assert_eq!(again.version, first.version);
  assert_eq!(again.receiver.confirmed_at, first.receiver.confirmed_at);

  let done = fx.custody.confirm(&fx.supervisor, id, ConfirmInput::default()).await.unwrap();
  assert_eq!(done.status, HandoffStatus::Completed);

  let err = fx.custody.confirm(&fx.driver, id, ConfirmInput::default()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "confirm", .. }));
}

#[tokio::test]
async fn concurrent_confirmations_both_land() {
  let fx = fixture().await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;

  let (by_sender, by_receiver) = tokio::join!(
    fx.custody.confirm(&fx.supervisor, id, ConfirmInput::default()),
    fx.custody.confirm(&fx.driver, id, ConfirmInput::default()),
  );
  by_sender.unwrap();
  by_receiver.unwrap();

  let stored = fx.custody.get(&fx.supervisor, id).await.unwrap();
  assert_eq!(stored.status, HandoffStatus::Completed);
  assert!(stored.sender.has_confirmed());
  assert!(stored.receiver.has_confirmed());

  let chain = fx.custody.chain(&fx.supervisor, fx.session.session_id).await.unwrap();
  assert_eq!(chain.chain_stage, ChainStage::DriverToIncinerator);
}

#[tokio::test]
async fn confirm_checks_company_before_status() {
  let fx = fixture().await;
  let id = completed_step_one(&fx).await;

  let outsider = actor(ActorRole::Supervisor, Uuid::new_v4(), "Other Co");
  let err = fx.custody.confirm(&outsider, id, ConfirmInput::default()).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn weights_are_only_accepted_from_the_receiver() {
  let fx = fixture().await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;

  let weights = vec![WeightReading { container_id: fx.bin_a, weight: 4.8 }];
  let err = fx
    .custody
    .confirm(&fx.supervisor, id, ConfirmInput { weights: weights.clone() })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let unknown = vec![WeightReading { container_id: Uuid::new_v4(), weight: 1.0 }];
  let err = fx
    .custody
    .confirm(&fx.driver, id, ConfirmInput { weights: unknown })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let h = fx.custody.confirm(&fx.driver, id, ConfirmInput { weights }).await.unwrap();
  assert_eq!(h.totals.confirmed_weight, 4.8);
  assert_eq!(h.totals.declared_weight, 8.0);
}

#[tokio::test]
async fn supervisor_can_stand_in_for_receiver_when_allowed() {
  let fx = fixture().await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;

  let other_driver = actor(ActorRole::Driver, fx.session.company_id, "Other Driver");
  let err = fx.custody.confirm(&other_driver, id, ConfirmInput::default()).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  let standin = actor(ActorRole::Supervisor, fx.session.company_id, "Night Supervisor");
  let h = fx.custody.confirm(&standin, id, ConfirmInput::default()).await.unwrap();
  assert_eq!(h.status, HandoffStatus::ConfirmedByReceiver);

  let config = ProtocolConfig { allow_supervisor_standin: false, ..Default::default() };
  let fx = fixture_with(config, ScriptedTransport::default()).await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;
  let standin = actor(ActorRole::Supervisor, fx.session.company_id, "Night Supervisor");
  let err = fx.custody.confirm(&standin, id, ConfirmInput::default()).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn token_confirms_exactly_once() {
  let fx = fixture().await;
  let created = step_two(&fx).await;
  let secret = created.confirmation_secret.unwrap();

  let summary = fx.custody.public_summary(&secret).await.unwrap();
  assert_eq!(summary.number, created.handoff.number);
  assert_eq!(summary.containers.len(), 2);
  assert!(summary.expires_at.is_some());

  fx.custody.confirm_by_token(&secret, &[]).await.unwrap();

  let replay = fx.custody.confirm_by_token(&secret, &[]).await.unwrap_err();
  let unknown = fx.custody.confirm_by_token("not-a-real-secret", &[]).await.unwrap_err();
  assert!(matches!(replay, Error::InvalidToken));
  assert!(matches!(unknown, Error::InvalidToken));
  assert_eq!(replay.to_string(), unknown.to_string());

  let err = fx.custody.public_summary(&secret).await.unwrap_err();
  assert!(matches!(err, Error::InvalidToken));

  let stored = fx.custody.store().get_handoff(created.handoff.handoff_id).await.unwrap().unwrap();
  assert!(stored.token.is_none());
  assert!(stored.receiver.has_confirmed());
}

#[tokio::test]
async fn expired_token_fails_like_unknown() {
  let config = ProtocolConfig { token_ttl: TimeDelta::seconds(-1), ..Default::default() };
  let fx = fixture_with(config, ScriptedTransport::default()).await;
  let created = step_two(&fx).await;
  let secret = created.confirmation_secret.unwrap();

  let expired = fx.custody.confirm_by_token(&secret, &[]).await.unwrap_err();
  let unknown = fx.custody.confirm_by_token("not-a-real-secret", &[]).await.unwrap_err();
  assert!(matches!(expired, Error::InvalidToken));
  assert_eq!(expired.to_string(), unknown.to_string());

  let stored = fx.custody.store().get_handoff(created.handoff.handoff_id).await.unwrap().unwrap();
  assert!(!stored.receiver.has_confirmed());
}

#[tokio::test]
async fn token_weights_must_match_handoff_containers() {
  let fx = fixture().await;
  let created = step_two(&fx).await;
  let secret = created.confirmation_secret.unwrap();

  let bogus = [WeightReading { container_id: Uuid::new_v4(), weight: 1.0 }];
  let err = fx.custody.confirm_by_token(&secret, &bogus).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  // A rejected attempt does not consume the token.
  fx.custody.confirm_by_token(&secret, &[]).await.unwrap();
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_channel_does_not_block_creation() {
  let fx = fixture_with(
    ProtocolConfig::default(),
    ScriptedTransport::failing(&[ChannelKind::Sms]),
  )
  .await;
  let created = step_two(&fx).await;

  assert_eq!(created.notifications.len(), 2);
  let sms = &created.notifications[0];
  assert_eq!(sms.channel, ChannelKind::Sms);
  assert_eq!(sms.status, DeliveryStatus::Failed);
  assert!(sms.failure_reason.as_deref().is_some_and(|r| r.contains("unavailable")));
  assert!(sms.provider_message_id.is_none());

  let whatsapp = &created.notifications[1];
  assert_eq!(whatsapp.channel, ChannelKind::Whatsapp);
  assert_eq!(whatsapp.status, DeliveryStatus::Sent);
  assert!(whatsapp.provider_message_id.is_some());
  assert!(whatsapp.content.contains(&created.handoff.number));
  assert!(whatsapp.content.contains("/public/handoffs/"));

  assert_eq!(created.handoff.status, HandoffStatus::Pending);

  let logs = fx
    .custody
    .notifications(&fx.supervisor, created.handoff.handoff_id, None, None)
    .await
    .unwrap();
  assert_eq!(logs.len(), 2);
}

#[tokio::test]
async fn undelivered_handoff_stays_created() {
  let fx = fixture_with(
    ProtocolConfig::default(),
    ScriptedTransport::failing(&[ChannelKind::Sms, ChannelKind::Whatsapp]),
  )
  .await;
  let created = step_two(&fx).await;

  assert!(created.notifications.iter().all(|l| l.status == DeliveryStatus::Failed));
  assert_eq!(created.handoff.status, HandoffStatus::Created);
  assert!(created.confirmation_secret.is_some());
}

#[tokio::test]
async fn notification_log_never_stores_the_secret() {
  let fx = fixture().await;
  let created = step_two(&fx).await;
  let secret = created.confirmation_secret.clone().unwrap();
  let fingerprint = created.handoff.token.as_ref().unwrap().fingerprint().to_string();

  let logs = fx
    .custody
    .notifications(&fx.supervisor, created.handoff.handoff_id, None, None)
    .await
    .unwrap();
  assert_eq!(logs.len(), 2);
  for log in logs.iter().chain(&created.notifications) {
    assert!(!log.content.contains(&secret));
    assert!(log.content.contains(&fingerprint));
  }

  // only the outbound message carries the working link
  assert_eq!(fx.custody.transport.last_secret(), secret);
}

#[tokio::test]
async fn receiver_confirming_mid_dispatch_does_not_fail_creation() {
  let fx = fixture().await;
  completed_step_one(&fx).await;
  *fx.custody.transport.confirm_on.lock().unwrap() =
    Some((ChannelKind::Whatsapp, fx.custody.store().clone()));

  let created = fx.custody.create_handoff(&fx.driver, step_two_request(&fx)).await.unwrap();
  assert!(created.confirmation_secret.is_some());
  assert_eq!(created.notifications.len(), 2);
  assert!(created.notifications.iter().all(|l| l.status == DeliveryStatus::Sent));
  assert_eq!(created.handoff.status, HandoffStatus::ConfirmedByReceiver);

  let stored = fx
    .custody
    .store()
    .get_handoff(created.handoff.handoff_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(stored.status, HandoffStatus::ConfirmedByReceiver);
  assert_eq!(stored.version, created.handoff.version);
}

#[tokio::test]
async fn resend_rotates_the_token() {
  let fx = fixture().await;
  let created = step_two(&fx).await;
  let old_secret = created.confirmation_secret.unwrap();
  let id = created.handoff.handoff_id;

  let dispatched = fx.custody.resend(&fx.driver, id).await.unwrap();
  assert_eq!(dispatched.notifications.len(), 2);
  assert!(dispatched.notifications.iter().all(|l| l.retry_count == 1));

  let new_secret = fx.custody.transport.last_secret();
  assert_ne!(new_secret, old_secret);

  let err = fx.custody.confirm_by_token(&old_secret, &[]).await.unwrap_err();
  assert!(matches!(err, Error::InvalidToken));
  fx.custody.confirm_by_token(&new_secret, &[]).await.unwrap();

  let err = fx.custody.resend(&fx.driver, id).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "resend", .. }));

  let logs = fx.custody.notifications(&fx.supervisor, id, Some(10), None).await.unwrap();
  assert_eq!(logs.len(), 4);
}

#[tokio::test]
async fn resend_is_gated() {
  let fx = fixture().await;
  let created = step_two(&fx).await;

  let other = actor(ActorRole::Driver, fx.session.company_id, "Other Driver");
  let err = fx.custody.resend(&other, created.handoff.handoff_id).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  fx.custody.resend(&fx.supervisor, created.handoff.handoff_id).await.unwrap();
}

// ─── Disputes ────────────────────────────────────────────────────────────────

fn dispute_input() -> DisputeInput {
  DisputeInput {
    reason:      DisputeReason::WeightMismatch,
    description: "Bin B reads 1 kg on the dock scale".into(),
    evidence:    vec!["photo:123".into()],
  }
}

#[tokio::test]
async fn dispute_and_resolution_lifecycle() {
  let fx = fixture().await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;

  let err = fx.custody.dispute(&fx.driver, id, dispute_input()).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  let err = fx.custody.resolve(&fx.supervisor, id, "nothing to resolve").await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "resolve", .. }));

  let disputed = fx.custody.dispute(&fx.supervisor, id, dispute_input()).await.unwrap();
  assert_eq!(disputed.status, HandoffStatus::Disputed);
  let dispute = disputed.dispute.as_ref().unwrap();
  assert_eq!(dispute.raised_by, fx.supervisor.account_id);
  assert!(dispute.resolved_by.is_none());

  let err = fx.custody.confirm(&fx.driver, id, ConfirmInput::default()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "confirm", .. }));

  let err = fx.custody.resolve(&fx.driver, id, "looks fine").await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  let err = fx.custody.resolve(&fx.supervisor, id, "   ").await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let claimed = fx.custody.start_resolution(&fx.supervisor, id).await.unwrap();
  assert_eq!(claimed.status, HandoffStatus::Resolving);
  let err = fx.custody.start_resolution(&fx.supervisor, id).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "claim", .. }));

  let resolved = fx.custody.resolve(&fx.supervisor, id, "Re-weighed, 3 kg").await.unwrap();
  assert_eq!(resolved.status, HandoffStatus::Resolved);
  let dispute = resolved.dispute.as_ref().unwrap();
  assert_eq!(dispute.resolved_by, Some(fx.supervisor.account_id));
  assert_eq!(dispute.resolution.as_deref(), Some("Re-weighed, 3 kg"));
  assert!(dispute.resolved_at.is_some());

  let err = fx.custody.dispute(&fx.supervisor, id, dispute_input()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "dispute", .. }));
}

#[tokio::test]
async fn dispute_revokes_outstanding_token() {
  let fx = fixture().await;
  let created = step_two(&fx).await;
  let secret = created.confirmation_secret.unwrap();

  fx.custody
    .dispute(&fx.driver, created.handoff.handoff_id, dispute_input())
    .await
    .unwrap();

  let err = fx.custody.confirm_by_token(&secret, &[]).await.unwrap_err();
  assert!(matches!(err, Error::InvalidToken));
}

#[tokio::test]
async fn completed_handoff_cannot_be_disputed() {
  let fx = fixture().await;
  let id = completed_step_one(&fx).await;
  let err = fx.custody.dispute(&fx.supervisor, id, dispute_input()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { action: "dispute", .. }));
}

// ─── Expiry ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn overdue_handoffs_expire_and_free_their_slot() {
  let config = ProtocolConfig { handoff_ttl: TimeDelta::seconds(-1), ..Default::default() };
  let fx = fixture_with(config, ScriptedTransport::default()).await;

  let created = fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
  assert_eq!(fx.custody.expire_overdue().await.unwrap(), 1);
  assert_eq!(fx.custody.expire_overdue().await.unwrap(), 0);

  let h = fx.custody.get(&fx.supervisor, created.handoff.handoff_id).await.unwrap();
  assert_eq!(h.status, HandoffStatus::Expired);

  let err = fx
    .custody
    .confirm(&fx.driver, created.handoff.handoff_id, ConfirmInput::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { status: HandoffStatus::Expired, .. }));

  // The expired step no longer blocks a new one.
  fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
}

#[tokio::test]
async fn overdue_handoff_expires_lazily_on_access() {
  let config = ProtocolConfig { handoff_ttl: TimeDelta::seconds(-1), ..Default::default() };
  let fx = fixture_with(config, ScriptedTransport::default()).await;

  let created = fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
  let err = fx
    .custody
    .confirm(&fx.supervisor, created.handoff.handoff_id, ConfirmInput::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { status: HandoffStatus::Expired, .. }));

  let stored = fx.custody.store().get_handoff(created.handoff.handoff_id).await.unwrap().unwrap();
  assert_eq!(stored.status, HandoffStatus::Expired);
}

#[tokio::test]
async fn open_disputes_outlive_the_handoff_expiry() {
  let fx = fixture().await;
  let id = fx
    .custody
    .create_handoff(&fx.supervisor, step_one_request(&fx))
    .await
    .unwrap()
    .handoff
    .handoff_id;
  fx.custody.dispute(&fx.supervisor, id, dispute_input()).await.unwrap();

  let mut stored = fx.custody.store().get_handoff(id).await.unwrap().unwrap();
  stored.expires_at = Utc::now() - TimeDelta::minutes(5);
  fx.custody.store().update_handoff(stored).await.unwrap().unwrap();

  assert_eq!(fx.custody.expire_overdue().await.unwrap(), 0);
  let resolved = fx.custody.resolve(&fx.supervisor, id, "Recounted, all present").await.unwrap();
  assert_eq!(resolved.status, HandoffStatus::Resolved);
  assert_eq!(
    resolved.dispute.as_ref().and_then(|d| d.resolution.as_deref()),
    Some("Recounted, all present")
  );
}

// ─── Scoping ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reads_are_scoped_by_company_and_party() {
  let fx = fixture().await;
  let created = fx.custody.create_handoff(&fx.supervisor, step_one_request(&fx)).await.unwrap();
  let id = created.handoff.handoff_id;

  let outsider = actor(ActorRole::Supervisor, Uuid::new_v4(), "Other Co");
  let err = fx.custody.get(&outsider, id).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));
  assert!(fx.custody.list(&outsider, ListFilter::default()).await.unwrap().is_empty());
  let err = fx.custody.chain(&outsider, fx.session.session_id).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));

  let admin = actor(ActorRole::Admin, Uuid::new_v4(), "Root");
  assert_eq!(fx.custody.get(&admin, id).await.unwrap().handoff_id, id);
  let filter = ListFilter { company_id: Some(fx.session.company_id), ..Default::default() };
  assert_eq!(fx.custody.list(&admin, filter).await.unwrap().len(), 1);

  let bystander = actor(ActorRole::Driver, fx.session.company_id, "Bystander");
  let err = fx.custody.get(&bystander, id).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));
  assert!(fx.custody.list(&bystander, ListFilter::default()).await.unwrap().is_empty());
  let chain = fx.custody.chain(&bystander, fx.session.session_id).await.unwrap();
  assert!(chain.handoffs.is_empty());

  assert_eq!(fx.custody.list(&fx.driver, ListFilter::default()).await.unwrap().len(), 1);
  let by_number = fx.custody.get_by_reference(&fx.driver, &created.handoff.number).await.unwrap();
  assert_eq!(by_number.handoff_id, id);

  let err = fx.custody.notifications(&fx.driver, id, None, None).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));
  let err = fx.custody.notifications(&outsider, id, None, None).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn unknown_handoff_is_not_found() {
  let fx = fixture().await;
  let err = fx.custody.get(&fx.supervisor, Uuid::new_v4()).await.unwrap_err();
  assert!(err.is_not_found());
  let err = fx.custody.get_by_reference(&fx.supervisor, "HO-19700101-0001").await.unwrap_err();
  assert!(matches!(err, Error::HandoffNotFound(_)));
}

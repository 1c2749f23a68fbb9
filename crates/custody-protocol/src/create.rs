//! Handoff creation.

use std::collections::HashSet;

use chrono::Utc;
use custody_core::{
  Error, Result,
  actor::{Actor, ActorRole},
  handoff::{ContainerLine, Handoff, HandoffType, Totals},
  notification::MessageTransport,
  party::{Party, PartyRole},
  registry::{CollectionSession, Plant},
  status::HandoffStatus,
  store::{CustodyStore, Inserted},
  token,
};
use uuid::Uuid;

use crate::{
  Custody,
  request::{ContainerInput, CreateHandoff, Created, ReceiverInput},
  sequencer::ChainSlot,
};

/// Default fill level when neither the caller nor the registry has one.
const DEFAULT_FILL_LEVEL: u8 = 100;

impl<S, T> Custody<S, T>
where
  S: CustodyStore,
  T: MessageTransport,
{
  /// Create a handoff.
  ///
  /// Validation and authorization run before anything is written. For a
  /// driver-to-incinerator handoff a confirmation token is issued, the
  /// receiver is notified on every configured channel, and the plaintext
  /// secret is returned in [`Created`] exactly once.
  pub async fn create_handoff(&self, actor: &Actor, req: CreateHandoff) -> Result<Created> {
    let now = Utc::now();
    validate_shape(&req)?;

    let session = match req.session_id {
      Some(id) => {
        let session = self
          .store
          .get_session(id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::SessionNotFound(id))?;
        if !actor.in_company(session.company_id) {
          return Err(Error::Forbidden("session belongs to another company".into()));
        }
        Some(session)
      }
      None => None,
    };
    authorize_creator(actor, req.handoff_type, session.as_ref())?;

    let company_id = session.as_ref().map_or(actor.company_id, |s| s.company_id);

    let plant = match req.plant_id {
      Some(id) => Some(
        self
          .store
          .get_plant(id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::PlantNotFound(id))?,
      ),
      None => None,
    };

    let mut containers = self.resolve_lines(company_id, &req.containers).await?;

    let (sender, receiver) =
      build_parties(actor, &req, session.as_ref(), plant.as_ref())?;

    let slot = match session {
      Some(session) => Some(self.begin_chain(session, req.handoff_type, now).await?),
      None => None,
    };

    // Chain-of-custody weight continuity.
    if let Some(ChainSlot { step_one: Some(step_one), .. }) = &slot {
      for line in containers.iter_mut().filter(|l| l.declared_weight.is_none()) {
        line.declared_weight = step_one.declared_weight_of(line.container_id);
      }
    }

    let issued = (req.handoff_type == HandoffType::DriverToIncinerator)
      .then(|| token::issue(self.config.token_ttl, now));

    let mut handoff = Handoff {
      handoff_id: Uuid::new_v4(),
      number: self.mint_number(now).await?,
      chain_id: slot.as_ref().map(|s| s.chain_id.clone()),
      handoff_type: req.handoff_type,
      sequence: slot
        .as_ref()
        .map_or(req.handoff_type.sequence(), |s| s.sequence),
      company_id,
      session_id: req.session_id,
      facility_id: req.facility_id,
      plant_id: req.plant_id,
      sender,
      receiver,
      containers,
      totals: Totals::default(),
      status: HandoffStatus::Created,
      token: issued.as_ref().map(|t| t.digest.clone()),
      dispute: None,
      completed_at: None,
      expires_at: now + self.config.handoff_ttl,
      created_at: now,
      updated_at: now,
      version: 0,
    };
    handoff.refresh(now);

    match self.store.insert_handoff(handoff.clone()).await.map_err(Error::store)? {
      Inserted::Created => {}
      Inserted::DuplicateActiveStep => {
        return Err(Error::DuplicateStep {
          session_id:   req.session_id.unwrap_or_default(),
          handoff_type: req.handoff_type,
        });
      }
    }
    tracing::info!(
      handoff = %handoff.number,
      handoff_type = %handoff.handoff_type,
      chain_id = handoff.chain_id.as_deref().unwrap_or("-"),
      containers = handoff.totals.container_count,
      "handoff created"
    );

    let Some(issued) = issued else {
      return Ok(Created { handoff, confirmation_secret: None, notifications: Vec::new() });
    };

    let (handoff, notifications) = self.notify_receiver(handoff, Some(&issued.secret)).await?;
    Ok(Created {
      handoff,
      confirmation_secret: Some(issued.secret),
      notifications,
    })
  }

  /// Turn request containers into line items, filling gaps from the
  /// container registry.
  async fn resolve_lines(
    &self,
    company_id: Uuid,
    inputs: &[ContainerInput],
  ) -> Result<Vec<ContainerLine>> {
    let mut lines = Vec::with_capacity(inputs.len());
    for input in inputs {
      let id = input.container_id();
      let container = self
        .store
        .get_container(id)
        .await
        .map_err(Error::store)?
        .filter(|c| c.company_id == company_id)
        .ok_or(Error::ContainerNotFound(id))?;

      let line = match input {
        ContainerInput::Id(_) => ContainerLine {
          container_id:     id,
          waste_class:      container.waste_class,
          fill_level:       DEFAULT_FILL_LEVEL,
          declared_weight:  None,
          confirmed_weight: None,
          bag_count:        0,
          notes:            None,
        },
        ContainerInput::Line(l) => ContainerLine {
          container_id:     id,
          waste_class:      l.waste_class.unwrap_or(container.waste_class),
          fill_level:       l.fill_level.unwrap_or(DEFAULT_FILL_LEVEL),
          declared_weight:  l.declared_weight,
          confirmed_weight: None,
          bag_count:        l.bag_count.unwrap_or(0),
          notes:            l.notes.clone(),
        },
      };
      lines.push(line);
    }
    Ok(lines)
  }
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn validate_shape(req: &CreateHandoff) -> Result<()> {
  if req.containers.is_empty() {
    return Err(Error::Validation("at least one container is required".into()));
  }

  let mut seen = HashSet::new();
  for input in &req.containers {
    if !seen.insert(input.container_id()) {
      return Err(Error::Validation(format!(
        "container {} listed more than once",
        input.container_id()
      )));
    }
    if let ContainerInput::Line(l) = input {
      if l.fill_level.is_some_and(|f| f > 100) {
        return Err(Error::Validation("fill level must be between 0 and 100".into()));
      }
      if l.declared_weight.is_some_and(|w| !w.is_finite() || w < 0.0) {
        return Err(Error::Validation("declared weight must be a non-negative number".into()));
      }
    }
  }

  let receiver = req.receiver.as_ref();
  match req.handoff_type {
    HandoffType::DriverToIncinerator => {
      if req.session_id.is_none() {
        return Err(Error::Validation(
          "a driver-to-incinerator handoff requires a session".into(),
        ));
      }
      let has_phone = receiver.and_then(|r| r.phone.as_deref()).is_some_and(|p| !p.trim().is_empty());
      if req.plant_id.is_none() && !has_phone {
        return Err(Error::Validation(
          "a driver-to-incinerator handoff requires a plant or a receiver phone".into(),
        ));
      }
    }
    HandoffType::FacilityToDriver => {
      if req.session_id.is_none() && receiver.and_then(|r| r.account_id).is_none() {
        return Err(Error::Validation(
          "a facility-to-driver handoff requires a session or a receiver account".into(),
        ));
      }
    }
  }
  Ok(())
}

/// Facility-side staff start step 1; the session's driver (or a supervisor
/// acting for them) starts step 2.
fn authorize_creator(
  actor: &Actor,
  kind: HandoffType,
  session: Option<&CollectionSession>,
) -> Result<()> {
  match (kind, actor.role) {
    (HandoffType::FacilityToDriver, ActorRole::Driver) => Err(Error::Forbidden(
      "drivers receive facility handoffs and cannot create them".into(),
    )),
    (HandoffType::DriverToIncinerator, ActorRole::Driver) => {
      match session {
        Some(s) if s.driver_id == actor.account_id => Ok(()),
        _ => Err(Error::Forbidden("only the session's driver may hand over its containers".into())),
      }
    }
    _ => Ok(()),
  }
}

fn non_blank(s: &Option<String>) -> Option<String> {
  s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn build_parties(
  actor: &Actor,
  req: &CreateHandoff,
  session: Option<&CollectionSession>,
  plant: Option<&Plant>,
) -> Result<(Party, Party)> {
  let receiver_in = req.receiver.clone().unwrap_or_default();

  match req.handoff_type {
    HandoffType::FacilityToDriver => {
      let sender = Party::new(
        PartyRole::Facility,
        non_blank(&req.sender_name).unwrap_or_else(|| actor.name.clone()),
      )
      .with_account(actor.account_id);

      let receiver = match (receiver_in.account_id, session) {
        (Some(account), _) => explicit_driver(account, &receiver_in),
        (None, Some(s)) => Party::new(PartyRole::Driver, s.driver_name.clone())
          .with_account(s.driver_id)
          .with_phone(s.driver_phone.clone()),
        (None, None) => {
          return Err(Error::Validation("no receiving driver could be determined".into()));
        }
      };

      if receiver.account_id == sender.account_id {
        return Err(Error::Validation("sender and receiver must be different accounts".into()));
      }
      Ok((sender, receiver))
    }
    HandoffType::DriverToIncinerator => {
      let session = session.ok_or_else(|| {
        Error::Validation("a driver-to-incinerator handoff requires a session".into())
      })?;
      let sender = Party::new(PartyRole::Driver, session.driver_name.clone())
        .with_account(session.driver_id)
        .with_phone(session.driver_phone.clone());

      let name = non_blank(&receiver_in.name)
        .or_else(|| plant.and_then(|p| non_blank(&p.operator_name)))
        .or_else(|| plant.map(|p| p.name.clone()))
        .unwrap_or_else(|| "Incinerator operator".to_string());
      let phone = non_blank(&receiver_in.phone).or_else(|| plant.and_then(|p| p.phone.clone()));

      let mut receiver = Party::new(PartyRole::IncineratorOperator, name).with_phone(phone);
      receiver.account_id = receiver_in.account_id;
      Ok((sender, receiver))
    }
  }
}

fn explicit_driver(account: Uuid, input: &ReceiverInput) -> Party {
  Party::new(
    PartyRole::Driver,
    non_blank(&input.name).unwrap_or_else(|| "Driver".to_string()),
  )
  .with_account(account)
  .with_phone(non_blank(&input.phone))
}

//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that lexicographic order equals time order and
//! expiry checks can run in SQL. Parties, line items, and disputes are stored
//! as compact JSON. Enums use their snake_case string form. UUIDs are stored
//! as hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use custody_core::{
  handoff::{Handoff, HandoffType, Totals},
  notification::NotificationLog,
  registry::{CollectionSession, Container, Plant},
  token::TokenDigest,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_day(day: NaiveDate) -> String { day.format("%Y-%m-%d").to_string() }

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_enum<T>(s: &str) -> Result<T>
where
  T: FromStr<Err = strum::ParseError>,
{
  Ok(T::from_str(s)?)
}

fn decode_u32(v: i64, column: &str) -> Result<u32> {
  u32::try_from(v).map_err(|_| Error::Decode(format!("{column} out of range: {v}")))
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// Raw strings read directly from a `sessions` row.
pub struct RawSession {
  pub session_id:   String,
  pub company_id:   String,
  pub driver_id:    String,
  pub driver_name:  String,
  pub driver_phone: Option<String>,
  pub chain_id:     Option<String>,
  pub chain_stage:  String,
  pub created_at:   String,
  pub updated_at:   String,
  pub version:      i64,
}

pub const SESSION_COLUMNS: &str = "session_id, company_id, driver_id, driver_name, \
  driver_phone, chain_id, chain_stage, created_at, updated_at, version";

impl RawSession {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      session_id:   row.get(0)?,
      company_id:   row.get(1)?,
      driver_id:    row.get(2)?,
      driver_name:  row.get(3)?,
      driver_phone: row.get(4)?,
      chain_id:     row.get(5)?,
      chain_stage:  row.get(6)?,
      created_at:   row.get(7)?,
      updated_at:   row.get(8)?,
      version:      row.get(9)?,
    })
  }

  pub fn into_session(self) -> Result<CollectionSession> {
    Ok(CollectionSession {
      session_id:   decode_uuid(&self.session_id)?,
      company_id:   decode_uuid(&self.company_id)?,
      driver_id:    decode_uuid(&self.driver_id)?,
      driver_name:  self.driver_name,
      driver_phone: self.driver_phone,
      chain_id:     self.chain_id,
      chain_stage:  decode_enum(&self.chain_stage)?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
      version:      decode_u32(self.version, "sessions.version")?,
    })
  }
}

// ─── Containers & plants ─────────────────────────────────────────────────────

pub struct RawContainer {
  pub container_id: String,
  pub company_id:   String,
  pub code:         String,
  pub waste_class:  String,
}

impl RawContainer {
  pub fn into_container(self) -> Result<Container> {
    Ok(Container {
      container_id: decode_uuid(&self.container_id)?,
      company_id:   decode_uuid(&self.company_id)?,
      code:         self.code,
      waste_class:  decode_enum(&self.waste_class)?,
    })
  }
}

pub struct RawPlant {
  pub plant_id:      String,
  pub name:          String,
  pub operator_name: Option<String>,
  pub phone:         Option<String>,
}

impl RawPlant {
  pub fn into_plant(self) -> Result<Plant> {
    Ok(Plant {
      plant_id:      decode_uuid(&self.plant_id)?,
      name:          self.name,
      operator_name: self.operator_name,
      phone:         self.phone,
    })
  }
}

// ─── Handoffs ────────────────────────────────────────────────────────────────

pub const HANDOFF_COLUMNS: &str = "handoff_id, number, chain_id, handoff_type, \
  sequence, company_id, session_id, facility_id, plant_id, sender_json, \
  receiver_json, containers_json, status, token_hash, token_expires_at, \
  dispute_json, completed_at, expires_at, created_at, updated_at, version";

/// Raw strings read directly from a `handoffs` row.
pub struct RawHandoff {
  pub handoff_id:       String,
  pub number:           String,
  pub chain_id:         Option<String>,
  pub handoff_type:     String,
  pub sequence:         i64,
  pub company_id:       String,
  pub session_id:       Option<String>,
  pub facility_id:      Option<String>,
  pub plant_id:         Option<String>,
  pub sender_json:      String,
  pub receiver_json:    String,
  pub containers_json:  String,
  pub status:           String,
  pub token_hash:       Option<String>,
  pub token_expires_at: Option<String>,
  pub dispute_json:     Option<String>,
  pub completed_at:     Option<String>,
  pub expires_at:       String,
  pub created_at:       String,
  pub updated_at:       String,
  pub version:          i64,
}

impl RawHandoff {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      handoff_id:       row.get(0)?,
      number:           row.get(1)?,
      chain_id:         row.get(2)?,
      handoff_type:     row.get(3)?,
      sequence:         row.get(4)?,
      company_id:       row.get(5)?,
      session_id:       row.get(6)?,
      facility_id:      row.get(7)?,
      plant_id:         row.get(8)?,
      sender_json:      row.get(9)?,
      receiver_json:    row.get(10)?,
      containers_json:  row.get(11)?,
      status:           row.get(12)?,
      token_hash:       row.get(13)?,
      token_expires_at: row.get(14)?,
      dispute_json:     row.get(15)?,
      completed_at:     row.get(16)?,
      expires_at:       row.get(17)?,
      created_at:       row.get(18)?,
      updated_at:       row.get(19)?,
      version:          row.get(20)?,
    })
  }

  pub fn into_handoff(self) -> Result<Handoff> {
    let handoff_type: HandoffType = decode_enum(&self.handoff_type)?;
    let sequence = u8::try_from(self.sequence)
      .ok()
      .filter(|s| *s == handoff_type.sequence())
      .ok_or_else(|| Error::Decode(format!("sequence {} for {handoff_type}", self.sequence)))?;

    let token = match (self.token_hash, self.token_expires_at) {
      (Some(hash), Some(at)) => Some(TokenDigest { hash, expires_at: decode_dt(&at)? }),
      _ => None,
    };

    let containers: Vec<_> = serde_json::from_str(&self.containers_json)?;
    let totals = Totals::from_lines(&containers);

    Ok(Handoff {
      handoff_id: decode_uuid(&self.handoff_id)?,
      number: self.number,
      chain_id: self.chain_id,
      handoff_type,
      sequence,
      company_id: decode_uuid(&self.company_id)?,
      session_id: decode_opt_uuid(self.session_id)?,
      facility_id: decode_opt_uuid(self.facility_id)?,
      plant_id: decode_opt_uuid(self.plant_id)?,
      sender: serde_json::from_str(&self.sender_json)?,
      receiver: serde_json::from_str(&self.receiver_json)?,
      containers,
      totals,
      status: decode_enum(&self.status)?,
      token,
      dispute: self
        .dispute_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      completed_at: decode_opt_dt(self.completed_at)?,
      expires_at: decode_dt(&self.expires_at)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
      version: decode_u32(self.version, "handoffs.version")?,
    })
  }
}

/// Column values for an insert or update of a handoff, in schema order.
pub struct HandoffRow {
  pub handoff_id:       String,
  pub number:           String,
  pub chain_id:         Option<String>,
  pub handoff_type:     String,
  pub sequence:         i64,
  pub company_id:       String,
  pub session_id:       Option<String>,
  pub facility_id:      Option<String>,
  pub plant_id:         Option<String>,
  pub sender_account:   Option<String>,
  pub receiver_account: Option<String>,
  pub sender_json:      String,
  pub receiver_json:    String,
  pub containers_json:  String,
  pub total_count:      i64,
  pub total_declared:   f64,
  pub total_confirmed:  f64,
  pub status:           String,
  pub token_hash:       Option<String>,
  pub token_expires_at: Option<String>,
  pub dispute_json:     Option<String>,
  pub completed_at:     Option<String>,
  pub expires_at:       String,
  pub created_at:       String,
  pub updated_at:       String,
  pub version:          i64,
}

impl HandoffRow {
  /// Encode a handoff. Totals are taken from the line items, never from the
  /// struct's cached copy.
  pub fn encode(h: &Handoff) -> Result<Self> {
    let totals = Totals::from_lines(&h.containers);
    Ok(Self {
      handoff_id:       encode_uuid(h.handoff_id),
      number:           h.number.clone(),
      chain_id:         h.chain_id.clone(),
      handoff_type:     h.handoff_type.as_ref().to_owned(),
      sequence:         i64::from(h.sequence),
      company_id:       encode_uuid(h.company_id),
      session_id:       h.session_id.map(encode_uuid),
      facility_id:      h.facility_id.map(encode_uuid),
      plant_id:         h.plant_id.map(encode_uuid),
      sender_account:   h.sender.account_id.map(encode_uuid),
      receiver_account: h.receiver.account_id.map(encode_uuid),
      sender_json:      serde_json::to_string(&h.sender)?,
      receiver_json:    serde_json::to_string(&h.receiver)?,
      containers_json:  serde_json::to_string(&h.containers)?,
      total_count:      i64::from(totals.container_count),
      total_declared:   totals.declared_weight,
      total_confirmed:  totals.confirmed_weight,
      status:           h.status.as_ref().to_owned(),
      token_hash:       h.token.as_ref().map(|t| t.hash.clone()),
      token_expires_at: h.token.as_ref().map(|t| encode_dt(t.expires_at)),
      dispute_json:     h.dispute.as_ref().map(serde_json::to_string).transpose()?,
      completed_at:     h.completed_at.map(encode_dt),
      expires_at:       encode_dt(h.expires_at),
      created_at:       encode_dt(h.created_at),
      updated_at:       encode_dt(h.updated_at),
      version:          i64::from(h.version),
    })
  }
}

// ─── Notification logs ───────────────────────────────────────────────────────

pub const NOTIFICATION_COLUMNS: &str = "log_id, handoff_id, recipient_account, \
  recipient_phone, recipient_name, channel, status, provider_message_id, \
  content, failure_reason, retry_count, created_at, sent_at";

/// Raw strings read directly from a `notification_logs` row.
pub struct RawNotification {
  pub log_id:              String,
  pub handoff_id:          String,
  pub recipient_account:   Option<String>,
  pub recipient_phone:     Option<String>,
  pub recipient_name:      String,
  pub channel:             String,
  pub status:              String,
  pub provider_message_id: Option<String>,
  pub content:             String,
  pub failure_reason:      Option<String>,
  pub retry_count:         i64,
  pub created_at:          String,
  pub sent_at:             Option<String>,
}

impl RawNotification {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      log_id:              row.get(0)?,
      handoff_id:          row.get(1)?,
      recipient_account:   row.get(2)?,
      recipient_phone:     row.get(3)?,
      recipient_name:      row.get(4)?,
      channel:             row.get(5)?,
      status:              row.get(6)?,
      provider_message_id: row.get(7)?,
      content:             row.get(8)?,
      failure_reason:      row.get(9)?,
      retry_count:         row.get(10)?,
      created_at:          row.get(11)?,
      sent_at:             row.get(12)?,
    })
  }

  pub fn into_log(self) -> Result<NotificationLog> {
    Ok(NotificationLog {
      log_id:              decode_uuid(&self.log_id)?,
      handoff_id:          decode_uuid(&self.handoff_id)?,
      recipient_account:   decode_opt_uuid(self.recipient_account)?,
      recipient_phone:     self.recipient_phone,
      recipient_name:      self.recipient_name,
      channel:             decode_enum(&self.channel)?,
      status:              decode_enum(&self.status)?,
      provider_message_id: self.provider_message_id,
      content:             self.content,
      failure_reason:      self.failure_reason,
      retry_count:         decode_u32(self.retry_count, "notification_logs.retry_count")?,
      created_at:          decode_dt(&self.created_at)?,
      sent_at:             decode_opt_dt(self.sent_at)?,
    })
  }
}

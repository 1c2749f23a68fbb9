//! [`SqliteStore`], the SQLite implementation of [`CustodyStore`].

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{OptionalExtension as _, types::Value};
use uuid::Uuid;

use custody_core::{
  handoff::{Handoff, HandoffType},
  notification::{ChannelKind, NotificationLog},
  registry::{CollectionSession, Container, Plant},
  status::HandoffStatus,
  store::{CustodyStore, HandoffQuery, Inserted},
};

use crate::{
  Result,
  encode::{
    HANDOFF_COLUMNS, HandoffRow, NOTIFICATION_COLUMNS, RawContainer, RawHandoff,
    RawNotification, RawPlant, RawSession, SESSION_COLUMNS, encode_day, encode_dt,
    encode_uuid,
  },
  schema::SCHEMA,
};

/// Statuses no operation can leave.
const TERMINAL: &str = "('completed', 'resolved', 'expired')";

/// Statuses that wait on a supervisor and never expire.
const IN_DISPUTE: &str = "('disputed', 'resolving')";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A custody store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a handoff `SELECT` built from [`HANDOFF_COLUMNS`] and decode the rows.
  async fn query_handoffs(&self, sql: String, params: Vec<Value>) -> Result<Vec<Handoff>> {
    let raws: Vec<RawHandoff> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawHandoff::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHandoff::into_handoff).collect()
  }

  async fn query_one_handoff(&self, sql: String, params: Vec<Value>) -> Result<Option<Handoff>> {
    Ok(self.query_handoffs(sql, params).await?.into_iter().next())
  }
}

// ─── CustodyStore impl ───────────────────────────────────────────────────────

impl CustodyStore for SqliteStore {
  type Error = crate::Error;

  // ── Reference data ────────────────────────────────────────────────────────

  async fn insert_session(&self, session: CollectionSession) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sessions (
             session_id, company_id, driver_id, driver_name, driver_phone,
             chain_id, chain_stage, created_at, updated_at, version
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            encode_uuid(session.session_id),
            encode_uuid(session.company_id),
            encode_uuid(session.driver_id),
            session.driver_name,
            session.driver_phone,
            session.chain_id,
            session.chain_stage.as_ref(),
            encode_dt(session.created_at),
            encode_dt(session.updated_at),
            session.version,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_session(&self, id: Uuid) -> Result<Option<CollectionSession>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            rusqlite::params![id_str],
            RawSession::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSession::into_session).transpose()
  }

  async fn update_session(
    &self,
    mut session: CollectionSession,
  ) -> Result<Option<CollectionSession>> {
    let id_str     = encode_uuid(session.session_id);
    let chain_id   = session.chain_id.clone();
    let stage      = session.chain_stage.as_ref().to_owned();
    let updated_at = encode_dt(session.updated_at);
    let version    = session.version;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sessions
              SET chain_id = ?2, chain_stage = ?3, updated_at = ?4,
                  version = version + 1
            WHERE session_id = ?1 AND version = ?5",
          rusqlite::params![id_str, chain_id, stage, updated_at, version],
        )?)
      })
      .await?;

    if changed == 0 {
      tracing::debug!(session_id = %session.session_id, version, "stale session update");
      return Ok(None);
    }
    session.version += 1;
    Ok(Some(session))
  }

  async fn insert_container(&self, container: Container) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO containers (container_id, company_id, code, waste_class)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![
            encode_uuid(container.container_id),
            encode_uuid(container.company_id),
            container.code,
            container.waste_class.as_ref(),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_container(&self, id: Uuid) -> Result<Option<Container>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawContainer> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT container_id, company_id, code, waste_class
               FROM containers WHERE container_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawContainer {
                container_id: row.get(0)?,
                company_id:   row.get(1)?,
                code:         row.get(2)?,
                waste_class:  row.get(3)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawContainer::into_container).transpose()
  }

  async fn insert_plant(&self, plant: Plant) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO plants (plant_id, name, operator_name, phone)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![
            encode_uuid(plant.plant_id),
            plant.name,
            plant.operator_name,
            plant.phone,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_plant(&self, id: Uuid) -> Result<Option<Plant>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawPlant> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT plant_id, name, operator_name, phone FROM plants WHERE plant_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawPlant {
                plant_id:      row.get(0)?,
                name:          row.get(1)?,
                operator_name: row.get(2)?,
                phone:         row.get(3)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawPlant::into_plant).transpose()
  }

  async fn next_daily_number(&self, scope: &'static str, day: NaiveDate) -> Result<u32> {
    let day_str = encode_day(day);

    let value: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "INSERT INTO daily_counters (scope, day, value) VALUES (?1, ?2, 1)
           ON CONFLICT (scope, day) DO UPDATE SET value = value + 1
           RETURNING value",
          rusqlite::params![scope, day_str],
          |row| row.get(0),
        )?)
      })
      .await?;

    u32::try_from(value)
      .map_err(|_| crate::Error::Decode(format!("daily counter overflow: {value}")))
  }

  // ── Handoffs ──────────────────────────────────────────────────────────────

  async fn insert_handoff(&self, handoff: Handoff) -> Result<Inserted> {
    let row = HandoffRow::encode(&handoff)?;

    let outcome = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO handoffs (
             handoff_id, number, chain_id, handoff_type, sequence, company_id,
             session_id, facility_id, plant_id, sender_account, receiver_account,
             sender_json, receiver_json, containers_json,
             total_count, total_declared, total_confirmed, status,
             token_hash, token_expires_at, dispute_json, completed_at,
             expires_at, created_at, updated_at, version
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                     ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24,
                     ?25, ?26)",
          rusqlite::params![
            row.handoff_id,
            row.number,
            row.chain_id,
            row.handoff_type,
            row.sequence,
            row.company_id,
            row.session_id,
            row.facility_id,
            row.plant_id,
            row.sender_account,
            row.receiver_account,
            row.sender_json,
            row.receiver_json,
            row.containers_json,
            row.total_count,
            row.total_declared,
            row.total_confirmed,
            row.status,
            row.token_hash,
            row.token_expires_at,
            row.dispute_json,
            row.completed_at,
            row.expires_at,
            row.created_at,
            row.updated_at,
            row.version,
          ],
        );
        match result {
          Ok(_) => Ok(Inserted::Created),
          // The partial unique index names both of its columns.
          Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
              && msg.contains("handoffs.session_id") =>
          {
            Ok(Inserted::DuplicateActiveStep)
          }
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    Ok(outcome)
  }

  async fn update_handoff(&self, mut handoff: Handoff) -> Result<Option<Handoff>> {
    let row = HandoffRow::encode(&handoff)?;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE handoffs SET
             chain_id = ?2, plant_id = ?3,
             sender_account = ?4, receiver_account = ?5,
             sender_json = ?6, receiver_json = ?7, containers_json = ?8,
             total_count = ?9, total_declared = ?10, total_confirmed = ?11,
             status = ?12, token_hash = ?13, token_expires_at = ?14,
             dispute_json = ?15, completed_at = ?16, expires_at = ?17,
             updated_at = ?18, version = version + 1
           WHERE handoff_id = ?1 AND version = ?19",
          rusqlite::params![
            row.handoff_id,
            row.chain_id,
            row.plant_id,
            row.sender_account,
            row.receiver_account,
            row.sender_json,
            row.receiver_json,
            row.containers_json,
            row.total_count,
            row.total_declared,
            row.total_confirmed,
            row.status,
            row.token_hash,
            row.token_expires_at,
            row.dispute_json,
            row.completed_at,
            row.expires_at,
            row.updated_at,
            row.version,
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      tracing::debug!(handoff = %handoff.number, version = handoff.version, "stale handoff update");
      return Ok(None);
    }
    handoff.version += 1;
    Ok(Some(handoff))
  }

  async fn get_handoff(&self, id: Uuid) -> Result<Option<Handoff>> {
    self
      .query_one_handoff(
        format!("SELECT {HANDOFF_COLUMNS} FROM handoffs WHERE handoff_id = ?1"),
        vec![Value::Text(encode_uuid(id))],
      )
      .await
  }

  async fn get_handoff_by_number(&self, number: String) -> Result<Option<Handoff>> {
    self
      .query_one_handoff(
        format!("SELECT {HANDOFF_COLUMNS} FROM handoffs WHERE number = ?1"),
        vec![Value::Text(number)],
      )
      .await
  }

  async fn find_by_token_hash(
    &self,
    hash: String,
    now: DateTime<Utc>,
  ) -> Result<Option<Handoff>> {
    self
      .query_one_handoff(
        format!(
          "SELECT {HANDOFF_COLUMNS} FROM handoffs
            WHERE token_hash = ?1 AND token_expires_at > ?2"
        ),
        vec![Value::Text(hash), Value::Text(encode_dt(now))],
      )
      .await
  }

  async fn find_active_step(
    &self,
    session_id: Uuid,
    handoff_type: HandoffType,
  ) -> Result<Option<Handoff>> {
    self
      .query_one_handoff(
        format!(
          "SELECT {HANDOFF_COLUMNS} FROM handoffs
            WHERE session_id = ?1 AND handoff_type = ?2 AND status <> ?3"
        ),
        vec![
          Value::Text(encode_uuid(session_id)),
          Value::Text(handoff_type.as_ref().to_owned()),
          Value::Text(HandoffStatus::Expired.as_ref().to_owned()),
        ],
      )
      .await
  }

  async fn list_handoffs(&self, query: &HandoffQuery) -> Result<Vec<Handoff>> {
    let mut conds: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    // Build WHERE clause dynamically; placeholders are numbered as pushed.
    let mut push = |cond: &str, value: Value, params: &mut Vec<Value>| {
      params.push(value);
      conds.push(cond.replace('?', &format!("?{}", params.len())));
    };

    if let Some(company) = query.company_id {
      push("company_id = ?", Value::Text(encode_uuid(company)), &mut params);
    }
    if let Some(session) = query.session_id {
      push("session_id = ?", Value::Text(encode_uuid(session)), &mut params);
    }
    if let Some(status) = query.status {
      push("status = ?", Value::Text(status.as_ref().to_owned()), &mut params);
    }
    if let Some(kind) = query.handoff_type {
      push("handoff_type = ?", Value::Text(kind.as_ref().to_owned()), &mut params);
    }
    if let Some(account) = query.party_account {
      push(
        "(sender_account = ? OR receiver_account = ?)",
        Value::Text(encode_uuid(account)),
        &mut params,
      );
    }

    let where_clause = if conds.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", conds.join(" AND "))
    };

    let limit = query.limit.unwrap_or(100) as i64;
    let offset = query.offset.unwrap_or(0) as i64;
    params.push(Value::Integer(limit));
    params.push(Value::Integer(offset));
    let (limit_idx, offset_idx) = (params.len() - 1, params.len());

    let sql = format!(
      "SELECT {HANDOFF_COLUMNS} FROM handoffs {where_clause}
        ORDER BY created_at DESC
        LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
    );
    self.query_handoffs(sql, params).await
  }

  async fn session_handoffs(&self, session_id: Uuid) -> Result<Vec<Handoff>> {
    self
      .query_handoffs(
        format!(
          "SELECT {HANDOFF_COLUMNS} FROM handoffs
            WHERE session_id = ?1
            ORDER BY sequence ASC, created_at ASC"
        ),
        vec![Value::Text(encode_uuid(session_id))],
      )
      .await
  }

  async fn overdue_handoffs(&self, now: DateTime<Utc>) -> Result<Vec<Handoff>> {
    self
      .query_handoffs(
        format!(
          "SELECT {HANDOFF_COLUMNS} FROM handoffs
            WHERE expires_at <= ?1 AND status NOT IN {TERMINAL}
              AND status NOT IN {IN_DISPUTE}"
        ),
        vec![Value::Text(encode_dt(now))],
      )
      .await
  }

  // ── Notification audit ────────────────────────────────────────────────────

  async fn insert_notification(&self, log: NotificationLog) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO notification_logs (
             log_id, handoff_id, recipient_account, recipient_phone,
             recipient_name, channel, status, provider_message_id, content,
             failure_reason, retry_count, created_at, sent_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          rusqlite::params![
            encode_uuid(log.log_id),
            encode_uuid(log.handoff_id),
            log.recipient_account.map(encode_uuid),
            log.recipient_phone,
            log.recipient_name,
            log.channel.as_ref(),
            log.status.as_ref(),
            log.provider_message_id,
            log.content,
            log.failure_reason,
            log.retry_count,
            encode_dt(log.created_at),
            log.sent_at.map(encode_dt),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_notifications(
    &self,
    handoff_id: Uuid,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<NotificationLog>> {
    let id_str = encode_uuid(handoff_id);
    let limit = limit as i64;
    let offset = offset as i64;

    let raws: Vec<RawNotification> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {NOTIFICATION_COLUMNS} FROM notification_logs
            WHERE handoff_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str, limit, offset], RawNotification::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawNotification::into_log).collect()
  }

  async fn count_notifications(&self, handoff_id: Uuid, channel: ChannelKind) -> Result<u32> {
    let id_str = encode_uuid(handoff_id);
    let channel_str = channel.as_ref().to_owned();

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM notification_logs WHERE handoff_id = ?1 AND channel = ?2",
          rusqlite::params![id_str, channel_str],
          |row| row.get(0),
        )?)
      })
      .await?;

    Ok(u32::try_from(count).unwrap_or(u32::MAX))
  }
}

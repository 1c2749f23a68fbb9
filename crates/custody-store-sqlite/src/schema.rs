//! SQL schema for the custody SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    session_id   TEXT PRIMARY KEY,
    company_id   TEXT NOT NULL,
    driver_id    TEXT NOT NULL,
    driver_name  TEXT NOT NULL,
    driver_phone TEXT,
    chain_id     TEXT UNIQUE,
    chain_stage  TEXT NOT NULL DEFAULT 'not_started',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    version      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS containers (
    container_id TEXT PRIMARY KEY,
    company_id   TEXT NOT NULL,
    code         TEXT NOT NULL,
    waste_class  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plants (
    plant_id      TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    operator_name TEXT,
    phone         TEXT
);

-- Per-scope, per-day counters for human-readable ids.
CREATE TABLE IF NOT EXISTS daily_counters (
    scope TEXT NOT NULL,   -- 'HO' | 'CH'
    day   TEXT NOT NULL,   -- YYYY-MM-DD
    value INTEGER NOT NULL,
    PRIMARY KEY (scope, day)
);

-- Handoffs are never deleted; expiry is a status.
CREATE TABLE IF NOT EXISTS handoffs (
    handoff_id        TEXT PRIMARY KEY,
    number            TEXT NOT NULL UNIQUE,
    chain_id          TEXT,
    handoff_type      TEXT NOT NULL,
    sequence          INTEGER NOT NULL,
    company_id        TEXT NOT NULL,
    session_id        TEXT REFERENCES sessions(session_id),
    facility_id       TEXT,
    plant_id          TEXT,
    sender_account    TEXT,            -- copied out of sender_json for filtering
    receiver_account  TEXT,            -- copied out of receiver_json for filtering
    sender_json       TEXT NOT NULL,
    receiver_json     TEXT NOT NULL,
    containers_json   TEXT NOT NULL,
    total_count       INTEGER NOT NULL,
    total_declared    REAL NOT NULL,
    total_confirmed   REAL NOT NULL,
    status            TEXT NOT NULL,
    token_hash        TEXT,
    token_expires_at  TEXT,
    dispute_json      TEXT,
    completed_at      TEXT,
    expires_at        TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    version           INTEGER NOT NULL DEFAULT 0,
    CHECK ((handoff_type = 'facility_to_driver'    AND sequence = 1)
        OR (handoff_type = 'driver_to_incinerator' AND sequence = 2)),
    CHECK ((token_hash IS NULL) = (token_expires_at IS NULL))
);

-- At most one non-expired handoff per (session, type). Closes the
-- check-then-insert race in chain sequencing.
CREATE UNIQUE INDEX IF NOT EXISTS handoffs_active_step_idx
    ON handoffs(session_id, handoff_type)
    WHERE session_id IS NOT NULL AND status <> 'expired';

CREATE UNIQUE INDEX IF NOT EXISTS handoffs_token_idx
    ON handoffs(token_hash) WHERE token_hash IS NOT NULL;

CREATE INDEX IF NOT EXISTS handoffs_company_idx ON handoffs(company_id);
CREATE INDEX IF NOT EXISTS handoffs_session_idx ON handoffs(session_id);
CREATE INDEX IF NOT EXISTS handoffs_expiry_idx  ON handoffs(expires_at);

-- Append-only: no UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS notification_logs (
    log_id              TEXT PRIMARY KEY,
    handoff_id          TEXT NOT NULL REFERENCES handoffs(handoff_id),
    recipient_account   TEXT,
    recipient_phone     TEXT,
    recipient_name      TEXT NOT NULL,
    channel             TEXT NOT NULL,
    status              TEXT NOT NULL,
    provider_message_id TEXT,
    content             TEXT NOT NULL,
    failure_reason      TEXT,
    retry_count         INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    sent_at             TEXT
);

CREATE INDEX IF NOT EXISTS notification_logs_handoff_idx
    ON notification_logs(handoff_id, channel);

PRAGMA user_version = 1;
";

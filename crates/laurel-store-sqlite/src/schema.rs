//! SQL schema for the laurel SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The ledger is strictly append-only.
-- The one-time consumed_at stamp from the expiry sweep is the only UPDATE
-- ever issued against this table; rows are never deleted.
CREATE TABLE IF NOT EXISTS ledger_entries (
    entry_id    TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    amount      INTEGER NOT NULL,  -- signed; positive=grant, negative=deduction
    reason      TEXT NOT NULL,
    action_key  TEXT,
    change_type TEXT NOT NULL,     -- 'add' | 'deduct'
    created_at  TEXT NOT NULL,     -- ISO 8601 UTC; server-assigned
    expires_at  TEXT,
    consumed_at TEXT
);

-- Grants per user, action, and UTC calendar day.
-- Day rollover is the reset; old rows are simply never read again.
CREATE TABLE IF NOT EXISTS daily_counters (
    user_id    TEXT NOT NULL,
    action_key TEXT NOT NULL,
    day        TEXT NOT NULL,      -- 'YYYY-MM-DD'
    count      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, action_key, day)
);

-- One row per (program, user); rows are never deleted.
CREATE TABLE IF NOT EXISTS memberships (
    program_id  TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    nickname    TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',  -- 'pending' | 'approved' | 'rejected'
    joined_at   TEXT NOT NULL,
    approved_at TEXT,
    rejected_at TEXT,
    PRIMARY KEY (program_id, user_id)
);

-- Rewards the retry shell gave up on; resolved, never deleted.
CREATE TABLE IF NOT EXISTS pending_rewards (
    pending_id  TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    action_key  TEXT NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}',
    error       TEXT NOT NULL,
    error_code  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'open',     -- 'open' | 'resolved'
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS consents (
    user_id    TEXT PRIMARY KEY,
    marketing  INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ledger_user_idx      ON ledger_entries(user_id);
CREATE INDEX IF NOT EXISTS ledger_action_idx    ON ledger_entries(user_id, action_key);
CREATE INDEX IF NOT EXISTS memberships_prog_idx ON memberships(program_id);
CREATE INDEX IF NOT EXISTS pending_open_idx     ON pending_rewards(status, created_at);

PRAGMA user_version = 1;
";

//! [`SqliteStore`] — the SQLite implementation of the laurel store traits.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use laurel_core::{
  id::{EntryId, ProgramId, UserId},
  ledger::{BalanceView, LedgerEntry, NewEntry, day_key},
  membership::{MemberStatus, Membership, NewMembership, ProgramLimits},
  pending::{NewPendingReward, PendingReward, PendingStatus},
  store::{
    AdmissionOutcome, Appended, ConsentStore, CountedAppend, DeductionOutcome,
    LedgerStore, MembershipStore, PendingStore,
  },
};

use crate::{
  Error, Result,
  encode::{
    RawLedgerEntry, RawMembership, RawPendingReward, encode_change_type,
    encode_dt, encode_member_status, encode_pending_status,
  },
  schema::SCHEMA,
};

// ─── Row helpers ─────────────────────────────────────────────────────────────

/// Pre-encoded `ledger_entries` column values, ready to move into a
/// connection call.
struct EntryRow {
  entry_id:    String,
  user_id:     String,
  amount:      i64,
  reason:      String,
  action_key:  Option<String>,
  change_type: String,
  created_at:  String,
  expires_at:  Option<String>,
}

fn encode_new_entry(entry: &NewEntry, created_at: DateTime<Utc>) -> EntryRow {
  EntryRow {
    entry_id:    entry.entry_id.as_str().to_owned(),
    user_id:     entry.user_id.as_str().to_owned(),
    amount:      entry.amount,
    reason:      entry.reason.clone(),
    action_key:  entry.action_key.clone(),
    change_type: encode_change_type(entry.change_type).to_owned(),
    created_at:  encode_dt(created_at),
    expires_at:  entry.expires_at.map(encode_dt),
  }
}

/// Insert an entry row. Works inside and outside a transaction —
/// `rusqlite::Transaction` derefs to `Connection`.
fn insert_entry(conn: &rusqlite::Connection, row: &EntryRow) -> rusqlite::Result<usize> {
  conn.execute(
    "INSERT OR IGNORE INTO ledger_entries (
       entry_id, user_id, amount, reason, action_key,
       change_type, created_at, expires_at, consumed_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
    rusqlite::params![
      row.entry_id,
      row.user_id,
      row.amount,
      row.reason,
      row.action_key,
      row.change_type,
      row.created_at,
      row.expires_at,
    ],
  )
}

fn entry_exists(conn: &rusqlite::Connection, entry_id: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM ledger_entries WHERE entry_id = ?1",
        rusqlite::params![entry_id],
        |_| Ok(true),
      )
      .optional()?
      .unwrap_or(false),
  )
}

/// Active balance as of `as_of`: non-expired, non-consumed grants plus all
/// deductions, restricted to entries that existed at `as_of`.
fn active_balance(
  conn:    &rusqlite::Connection,
  user_id: &str,
  as_of:   &str,
) -> rusqlite::Result<i64> {
  conn.query_row(
    "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries
     WHERE user_id = ?1
       AND created_at <= ?2
       AND (change_type = 'deduct'
            OR (consumed_at IS NULL
                AND (expires_at IS NULL OR expires_at > ?2)))",
    rusqlite::params![user_id, as_of],
    |row| row.get(0),
  )
}

fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLedgerEntry> {
  Ok(RawLedgerEntry {
    entry_id:    row.get(0)?,
    user_id:     row.get(1)?,
    amount:      row.get(2)?,
    reason:      row.get(3)?,
    action_key:  row.get(4)?,
    change_type: row.get(5)?,
    created_at:  row.get(6)?,
    expires_at:  row.get(7)?,
    consumed_at: row.get(8)?,
  })
}

const ENTRY_COLUMNS: &str = "entry_id, user_id, amount, reason, action_key, \
                             change_type, created_at, expires_at, consumed_at";

fn read_membership_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMembership> {
  Ok(RawMembership {
    program_id:  row.get(0)?,
    user_id:     row.get(1)?,
    nickname:    row.get(2)?,
    status:      row.get(3)?,
    joined_at:   row.get(4)?,
    approved_at: row.get(5)?,
    rejected_at: row.get(6)?,
  })
}

const MEMBERSHIP_COLUMNS: &str =
  "program_id, user_id, nickname, status, joined_at, approved_at, rejected_at";

fn read_pending_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPendingReward> {
  Ok(RawPendingReward {
    pending_id:  row.get(0)?,
    user_id:     row.get(1)?,
    action_key:  row.get(2)?,
    metadata:    row.get(3)?,
    error:       row.get(4)?,
    error_code:  row.get(5)?,
    created_at:  row.get(6)?,
    status:      row.get(7)?,
    resolved_at: row.get(8)?,
  })
}

const PENDING_COLUMNS: &str = "pending_id, user_id, action_key, metadata, \
                               error, error_code, created_at, status, resolved_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A laurel store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
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

  /// Open an in-memory store — useful for testing.
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
}

// ─── LedgerStore impl ────────────────────────────────────────────────────────

impl LedgerStore for SqliteStore {
  type Error = Error;

  async fn append(&self, entry: NewEntry) -> Result<Appended> {
    let row = encode_new_entry(&entry, Utc::now());

    let created = self
      .conn
      .call(move |conn| Ok(insert_entry(conn, &row)? > 0))
      .await?;

    Ok(Appended { created })
  }

  async fn append_counted(
    &self,
    entry: NewEntry,
    cap:   Option<u32>,
  ) -> Result<CountedAppend> {
    let now = Utc::now();
    let row = encode_new_entry(&entry, now);
    let counter_action = entry.action_key.clone().unwrap_or_default();
    let day = day_key(now);
    let cap = cap.map(i64::from);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if entry_exists(&tx, &row.entry_id)? {
          return Ok(CountedAppend::Duplicate);
        }

        let count: i64 = tx
          .query_row(
            "SELECT count FROM daily_counters
             WHERE user_id = ?1 AND action_key = ?2 AND day = ?3",
            rusqlite::params![row.user_id, counter_action, day],
            |r| r.get(0),
          )
          .optional()?
          .unwrap_or(0);

        if let Some(cap) = cap
          && count >= cap
        {
          return Ok(CountedAppend::CapExceeded);
        }

        insert_entry(&tx, &row)?;
        tx.execute(
          "INSERT INTO daily_counters (user_id, action_key, day, count)
           VALUES (?1, ?2, ?3, 1)
           ON CONFLICT(user_id, action_key, day) DO UPDATE SET count = count + 1",
          rusqlite::params![row.user_id, counter_action, day],
        )?;
        tx.commit()?;

        Ok(CountedAppend::Created)
      })
      .await?;

    Ok(outcome)
  }

  async fn append_deduction(&self, entry: NewEntry) -> Result<DeductionOutcome> {
    let now = Utc::now();
    let mut row = encode_new_entry(&entry, now);
    let as_of = encode_dt(now);
    let requested = entry.amount.unsigned_abs() as i64;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if entry_exists(&tx, &row.entry_id)? {
          return Ok(DeductionOutcome { deducted: 0, duplicate: true });
        }

        // Clamp inside the transaction so the balance cannot go negative
        // even under concurrent deductions.
        let balance = active_balance(&tx, &row.user_id, &as_of)?.max(0);
        let deducted = requested.min(balance);

        row.amount = -deducted;
        insert_entry(&tx, &row)?;
        tx.commit()?;

        Ok(DeductionOutcome { deducted, duplicate: false })
      })
      .await?;

    Ok(outcome)
  }

  async fn entry(&self, id: &EntryId) -> Result<Option<LedgerEntry>> {
    let id_str = id.as_str().to_owned();

    let raw: Option<RawLedgerEntry> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE entry_id = ?1"),
              rusqlite::params![id_str],
              read_entry_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLedgerEntry::into_entry).transpose()
  }

  async fn entries_for_user(&self, user: &UserId) -> Result<Vec<LedgerEntry>> {
    let user_str = user.as_str().to_owned();

    let raws: Vec<RawLedgerEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENTRY_COLUMNS} FROM ledger_entries
           WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_str], read_entry_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLedgerEntry::into_entry).collect()
  }

  async fn balance(
    &self,
    user:  &UserId,
    as_of: Option<DateTime<Utc>>,
  ) -> Result<BalanceView> {
    let as_of_resolved = as_of.unwrap_or_else(Utc::now);
    let user_str = user.as_str().to_owned();
    let as_of_str = encode_dt(as_of_resolved);

    let total = self
      .conn
      .call(move |conn| Ok(active_balance(conn, &user_str, &as_of_str)?))
      .await?;

    Ok(BalanceView { user_id: user.clone(), as_of: as_of_resolved, total })
  }

  async fn daily_count(
    &self,
    user:       &UserId,
    action_key: &str,
    day:        &str,
  ) -> Result<u32> {
    let user_str = user.as_str().to_owned();
    let action = action_key.to_owned();
    let day = day.to_owned();

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT count FROM daily_counters
               WHERE user_id = ?1 AND action_key = ?2 AND day = ?3",
              rusqlite::params![user_str, action, day],
              |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0),
        )
      })
      .await?;

    Ok(count as u32)
  }

  async fn sweep_expired(&self, user: &UserId, as_of: DateTime<Utc>) -> Result<u32> {
    let user_str = user.as_str().to_owned();
    let as_of_str = encode_dt(as_of);

    let stamped = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE ledger_entries SET consumed_at = ?2
           WHERE user_id = ?1
             AND change_type = 'add'
             AND consumed_at IS NULL
             AND expires_at IS NOT NULL
             AND expires_at <= ?2",
          rusqlite::params![user_str, as_of_str],
        )?;
        Ok(changed)
      })
      .await?;

    Ok(stamped as u32)
  }
}

// ─── MembershipStore impl ────────────────────────────────────────────────────

/// Outcome signal carried out of the admission transaction closure.
enum ApplySignal {
  Inserted,
  Duplicate,
  NicknameTaken,
  CapacityReached,
}

impl MembershipStore for SqliteStore {
  type Error = Error;

  async fn apply(
    &self,
    program:     &ProgramId,
    application: NewMembership,
    limits:      &ProgramLimits,
  ) -> Result<AdmissionOutcome> {
    let membership = Membership {
      program_id:  program.clone(),
      user_id:     application.user_id,
      nickname:    application.nickname,
      status:      MemberStatus::Pending,
      joined_at:   Utc::now(),
      approved_at: None,
      rejected_at: None,
    };

    let program_str = program.as_str().to_owned();
    let user_str = membership.user_id.as_str().to_owned();
    let nickname = membership.nickname.clone();
    let joined_str = encode_dt(membership.joined_at);
    let limits = *limits;

    // The five checks and the insert form one transaction; SQLite
    // serialises writers, so no interleaving can admit past capacity.
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let duplicate: bool = tx
          .query_row(
            "SELECT 1 FROM memberships WHERE program_id = ?1 AND user_id = ?2",
            rusqlite::params![program_str, user_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if duplicate {
          return Ok(ApplySignal::Duplicate);
        }

        let nickname_taken: bool = tx
          .query_row(
            "SELECT 1 FROM memberships
             WHERE program_id = ?1 AND nickname = ?2 AND status != 'rejected'",
            rusqlite::params![program_str, nickname],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if nickname_taken {
          return Ok(ApplySignal::NicknameTaken);
        }

        if limits.enforce_capacity {
          let holding: i64 = tx.query_row(
            "SELECT COUNT(*) FROM memberships
             WHERE program_id = ?1 AND status != 'rejected'",
            rusqlite::params![program_str],
            |r| r.get(0),
          )?;
          if holding >= i64::from(limits.capacity) {
            return Ok(ApplySignal::CapacityReached);
          }
        }

        tx.execute(
          "INSERT INTO memberships
             (program_id, user_id, nickname, status, joined_at)
           VALUES (?1, ?2, ?3, 'pending', ?4)",
          rusqlite::params![program_str, user_str, nickname, joined_str],
        )?;
        tx.commit()?;

        Ok(ApplySignal::Inserted)
      })
      .await?;

    Ok(match outcome {
      ApplySignal::Inserted => AdmissionOutcome::Admitted(membership),
      ApplySignal::Duplicate => AdmissionOutcome::DuplicateApplication,
      ApplySignal::NicknameTaken => AdmissionOutcome::NicknameTaken,
      ApplySignal::CapacityReached => AdmissionOutcome::CapacityReached,
    })
  }

  async fn membership(
    &self,
    program: &ProgramId,
    user:    &UserId,
  ) -> Result<Option<Membership>> {
    let program_str = program.as_str().to_owned();
    let user_str = user.as_str().to_owned();

    let raw: Option<RawMembership> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
                 WHERE program_id = ?1 AND user_id = ?2"
              ),
              rusqlite::params![program_str, user_str],
              read_membership_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawMembership::into_membership).transpose()
  }

  async fn members(&self, program: &ProgramId) -> Result<Vec<Membership>> {
    let program_str = program.as_str().to_owned();

    let raws: Vec<RawMembership> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
           WHERE program_id = ?1 ORDER BY joined_at ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![program_str], read_membership_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMembership::into_membership).collect()
  }

  async fn set_status(
    &self,
    program: &ProgramId,
    user:    &UserId,
    status:  MemberStatus,
  ) -> Result<Membership> {
    let program_str = program.as_str().to_owned();
    let user_str = user.as_str().to_owned();
    let status_str = encode_member_status(status).to_owned();
    let stamp = encode_dt(Utc::now());

    let raw: Option<RawMembership> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let stamp_sql = match status_str.as_str() {
          "approved" => "approved_at = ?3",
          "rejected" => "rejected_at = ?3",
          _ => "joined_at = joined_at",
        };
        let changed = tx.execute(
          &format!(
            "UPDATE memberships SET status = ?4, {stamp_sql}
             WHERE program_id = ?1 AND user_id = ?2"
          ),
          rusqlite::params![program_str, user_str, stamp, status_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }

        let raw = tx.query_row(
          &format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
             WHERE program_id = ?1 AND user_id = ?2"
          ),
          rusqlite::params![program_str, user_str],
          read_membership_row,
        )?;
        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    match raw {
      Some(raw) => raw.into_membership(),
      None => Err(Error::MembershipNotFound(format!("{program}/{user}"))),
    }
  }
}

// ─── PendingStore impl ───────────────────────────────────────────────────────

impl PendingStore for SqliteStore {
  type Error = Error;

  async fn record(&self, pending: NewPendingReward) -> Result<PendingReward> {
    let record = PendingReward {
      pending_id:  Uuid::new_v4(),
      user_id:     pending.user_id,
      action_key:  pending.action_key,
      metadata:    pending.metadata,
      error:       pending.error,
      error_code:  pending.error_code,
      created_at:  Utc::now(),
      status:      PendingStatus::Open,
      resolved_at: None,
    };

    let id_str = record.pending_id.hyphenated().to_string();
    let user_str = record.user_id.as_str().to_owned();
    let action = record.action_key.clone();
    let metadata = record.metadata.to_string();
    let error = record.error.clone();
    let error_code = record.error_code.clone();
    let created_str = encode_dt(record.created_at);
    let status_str = encode_pending_status(record.status).to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pending_rewards
             (pending_id, user_id, action_key, metadata,
              error, error_code, created_at, status)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str, user_str, action, metadata, error, error_code, created_str,
            status_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn open(&self, limit: usize) -> Result<Vec<PendingReward>> {
    let limit = limit as i64;

    let raws: Vec<RawPendingReward> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PENDING_COLUMNS} FROM pending_rewards
           WHERE status = 'open' ORDER BY created_at ASC LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit], read_pending_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPendingReward::into_pending).collect()
  }

  async fn resolve(&self, id: &Uuid) -> Result<PendingReward> {
    let id_str = id.hyphenated().to_string();
    let now_str = encode_dt(Utc::now());

    let raw: Option<RawPendingReward> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // Idempotent: resolving a resolved record keeps the first stamp.
        tx.execute(
          "UPDATE pending_rewards SET status = 'resolved', resolved_at = ?2
           WHERE pending_id = ?1 AND status = 'open'",
          rusqlite::params![id_str, now_str],
        )?;

        let raw = tx
          .query_row(
            &format!(
              "SELECT {PENDING_COLUMNS} FROM pending_rewards WHERE pending_id = ?1"
            ),
            rusqlite::params![id_str],
            read_pending_row,
          )
          .optional()?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    match raw {
      Some(raw) => raw.into_pending(),
      None => Err(Error::PendingNotFound(*id)),
    }
  }
}

// ─── ConsentStore impl ───────────────────────────────────────────────────────

impl ConsentStore for SqliteStore {
  type Error = Error;

  async fn set_marketing_consent(&self, user: &UserId, granted: bool) -> Result<()> {
    let user_str = user.as_str().to_owned();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO consents (user_id, marketing, updated_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(user_id) DO UPDATE SET marketing = ?2, updated_at = ?3",
          rusqlite::params![user_str, granted as i64, now_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn has_marketing_consent(&self, user: &UserId) -> Result<bool> {
    let user_str = user.as_str().to_owned();

    let granted: i64 = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT marketing FROM consents WHERE user_id = ?1",
              rusqlite::params![user_str],
              |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0),
        )
      })
      .await?;

    Ok(granted != 0)
  }
}

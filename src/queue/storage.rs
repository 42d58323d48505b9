//! Queue storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Row};

use super::types::{AlertPayload, AlertStatus, QueuedAlert};
use crate::db::Database;

/// Trait for persistent alert queue backends.
pub trait QueueStorage: Send + Sync {
  /// Append an alert and return the id assigned to it.
  fn insert(&self, alert: &QueuedAlert) -> Result<i64>;

  /// Overwrite the retry counter of an existing alert.
  fn set_retries(&self, id: i64, retries: u32) -> Result<()>;

  fn delete(&self, id: i64) -> Result<()>;

  /// All alerts with `status`, oldest insert first.
  fn list_by_status(&self, status: AlertStatus) -> Result<Vec<QueuedAlert>>;

  /// All alerts queued strictly before `cutoff`, regardless of status.
  fn list_queued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueuedAlert>>;

  fn count_by_status(&self, status: AlertStatus) -> Result<usize>;

  fn clear(&self) -> Result<()>;
}

/// SQLite-backed queue in the `sos_queue` table.
pub struct SqliteQueueStorage {
  db: Database,
}

impl SqliteQueueStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

const SELECT_COLUMNS: &str =
  "SELECT id, latitude, longitude, message, captured_at, queued_at, status, retries FROM sos_queue";

/// Raw column values; decoded outside the rusqlite row closure so that
/// parse errors surface as eyre errors.
struct AlertRow {
  id: i64,
  latitude: f64,
  longitude: f64,
  message: Option<String>,
  captured_at: String,
  queued_at: i64,
  status: String,
  retries: u32,
}

impl AlertRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      latitude: row.get(1)?,
      longitude: row.get(2)?,
      message: row.get(3)?,
      captured_at: row.get(4)?,
      queued_at: row.get(5)?,
      status: row.get(6)?,
      retries: row.get(7)?,
    })
  }

  fn into_alert(self) -> Result<QueuedAlert> {
    let timestamp = DateTime::parse_from_rfc3339(&self.captured_at)
      .map_err(|e| eyre!("Bad captured_at '{}' on alert {}: {}", self.captured_at, self.id, e))?
      .with_timezone(&Utc);
    let queued_at = DateTime::from_timestamp_millis(self.queued_at)
      .ok_or_else(|| eyre!("Bad queued_at {} on alert {}", self.queued_at, self.id))?;

    Ok(QueuedAlert {
      id: self.id,
      payload: AlertPayload {
        latitude: self.latitude,
        longitude: self.longitude,
        message: self.message,
        timestamp,
      },
      queued_at,
      status: AlertStatus::parse(&self.status)?,
      retries: self.retries,
    })
  }
}

impl SqliteQueueStorage {
  fn query_alerts(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<QueuedAlert>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<AlertRow> = stmt
      .query_map(params, AlertRow::from_row)
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    rows.into_iter().map(AlertRow::into_alert).collect()
  }
}

impl QueueStorage for SqliteQueueStorage {
  fn insert(&self, alert: &QueuedAlert) -> Result<i64> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO sos_queue (latitude, longitude, message, captured_at, queued_at, status, retries)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          alert.payload.latitude,
          alert.payload.longitude,
          alert.payload.message,
          alert.payload.timestamp.to_rfc3339(),
          alert.queued_at.timestamp_millis(),
          alert.status.as_str(),
          alert.retries,
        ],
      )
      .map_err(|e| eyre!("Failed to queue alert: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn set_retries(&self, id: i64, retries: u32) -> Result<()> {
    let conn = self.db.lock()?;
    let updated = conn
      .execute(
        "UPDATE sos_queue SET retries = ? WHERE id = ?",
        params![retries, id],
      )
      .map_err(|e| eyre!("Failed to update alert {}: {}", id, e))?;

    if updated == 0 {
      return Err(eyre!("Alert {} not found", id));
    }
    Ok(())
  }

  fn delete(&self, id: i64) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM sos_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete alert {}: {}", id, e))?;
    Ok(())
  }

  fn list_by_status(&self, status: AlertStatus) -> Result<Vec<QueuedAlert>> {
    let sql = format!("{} WHERE status = ? ORDER BY id", SELECT_COLUMNS);
    self.query_alerts(&sql, params![status.as_str()])
  }

  fn list_queued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueuedAlert>> {
    let sql = format!("{} WHERE queued_at < ? ORDER BY id", SELECT_COLUMNS);
    self.query_alerts(&sql, params![cutoff.timestamp_millis()])
  }

  fn count_by_status(&self, status: AlertStatus) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sos_queue WHERE status = ?",
        params![status.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;
    Ok(count as usize)
  }

  fn clear(&self) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM sos_queue", [])
      .map_err(|e| eyre!("Failed to clear queue: {}", e))?;
    Ok(())
  }
}

/// In-memory queue for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryQueueStorage {
  inner: std::sync::Mutex<(i64, std::collections::BTreeMap<i64, QueuedAlert>)>,
}

#[cfg(test)]
impl QueueStorage for MemoryQueueStorage {
  fn insert(&self, alert: &QueuedAlert) -> Result<i64> {
    let mut guard = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let (next_id, items) = &mut *guard;
    *next_id += 1;
    let id = *next_id;
    items.insert(id, QueuedAlert { id, ..alert.clone() });
    Ok(id)
  }

  fn set_retries(&self, id: i64, retries: u32) -> Result<()> {
    let mut guard = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let alert = guard
      .1
      .get_mut(&id)
      .ok_or_else(|| eyre!("Alert {} not found", id))?;
    alert.retries = retries;
    Ok(())
  }

  fn delete(&self, id: i64) -> Result<()> {
    let mut guard = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    guard.1.remove(&id);
    Ok(())
  }

  fn list_by_status(&self, status: AlertStatus) -> Result<Vec<QueuedAlert>> {
    let guard = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(guard.1.values().filter(|a| a.status == status).cloned().collect())
  }

  fn list_queued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueuedAlert>> {
    let guard = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(guard.1.values().filter(|a| a.queued_at < cutoff).cloned().collect())
  }

  fn count_by_status(&self, status: AlertStatus) -> Result<usize> {
    Ok(self.list_by_status(status)?.len())
  }

  fn clear(&self) -> Result<()> {
    let mut guard = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    guard.1.clear();
    Ok(())
  }
}

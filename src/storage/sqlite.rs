//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the SessionStore trait.

use crate::state::{BreakerSnapshot, BreakerState, RiskLevel, SessionStatus, StopReason};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{SessionStore, StorageError, StorageResult};
use crate::storage::{date_to_key, Admission, SessionOutcome, SessionRecord};
use crate::HarvestError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const SESSION_COLUMNS: &str = "date_key, slot_name, session_id, status, assigned_areas, \
     started_at, ended_at, items_processed, error_count, stop_reason, final_risk, \
     config_hash, error_message";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// Several processes may open the same file; writers wait on each other
    /// through the busy timeout instead of failing.
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_sessions(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<SessionRecord>> {
        let sql = format!("SELECT {} FROM sessions {}", SESSION_COLUMNS, where_clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params, row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

impl SessionStore for SqliteStorage {
    // ===== Day Planning =====

    fn schedule_day(&mut self, date_key: NaiveDate, slots: &[String]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO sessions (date_key, slot_name, status) VALUES (?1, ?2, ?3)",
            )?;
            for slot in slots {
                created += stmt.execute(params![
                    date_to_key(date_key),
                    slot,
                    SessionStatus::Scheduled.to_db_string()
                ])?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    // ===== Session Lifecycle =====

    fn try_begin(
        &mut self,
        date_key: NaiveDate,
        slot_name: &str,
        session_id: &str,
        config_hash: &str,
    ) -> StorageResult<Admission> {
        let now = Utc::now().to_rfc3339();

        // Single conditional write: inserts a fresh row, or takes over a row
        // that is still `scheduled`. Any other existing row is left untouched
        // and the statement reports zero changes.
        let changed = self.conn.execute(
            "INSERT INTO sessions (date_key, slot_name, session_id, status, started_at, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(date_key, slot_name) DO UPDATE SET
                 session_id = excluded.session_id,
                 status = excluded.status,
                 started_at = excluded.started_at,
                 config_hash = excluded.config_hash
             WHERE sessions.status = ?7",
            params![
                date_to_key(date_key),
                slot_name,
                session_id,
                SessionStatus::Running.to_db_string(),
                now,
                config_hash,
                SessionStatus::Scheduled.to_db_string(),
            ],
        )?;

        Ok(if changed == 1 {
            Admission::Admitted
        } else {
            Admission::Duplicate
        })
    }

    fn set_assigned_areas(
        &mut self,
        date_key: NaiveDate,
        session_id: &str,
        areas: &[String],
    ) -> StorageResult<()> {
        let json = serde_json::to_string(areas)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let changed = self.conn.execute(
            "UPDATE sessions SET assigned_areas = ?1 WHERE date_key = ?2 AND session_id = ?3",
            params![json, date_to_key(date_key), session_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn record_progress(
        &mut self,
        date_key: NaiveDate,
        session_id: &str,
        items_processed: u32,
        error_count: u32,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE sessions SET items_processed = ?1, error_count = ?2
             WHERE date_key = ?3 AND session_id = ?4 AND status = ?5",
            params![
                items_processed,
                error_count,
                date_to_key(date_key),
                session_id,
                SessionStatus::Running.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn complete(
        &mut self,
        date_key: NaiveDate,
        session_id: &str,
        outcome: &SessionOutcome,
    ) -> StorageResult<()> {
        if !outcome.status.is_terminal() {
            return Err(StorageError::InvalidTransition {
                from: SessionStatus::Running,
                to: outcome.status,
            });
        }

        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?1, ended_at = ?2, items_processed = ?3,
             error_count = ?4, stop_reason = ?5, final_risk = ?6, error_message = ?7
             WHERE date_key = ?8 AND session_id = ?9 AND status = ?10",
            params![
                outcome.status.to_db_string(),
                now,
                outcome.items_processed,
                outcome.error_count,
                outcome.stop_reason.map(|r| r.to_db_string()),
                outcome.final_risk.map(|r| r.to_db_string()),
                outcome.error_message,
                date_to_key(date_key),
                session_id,
                SessionStatus::Running.to_db_string(),
            ],
        )?;

        if changed == 1 {
            return Ok(());
        }

        match self.get_session(date_key, session_id)? {
            None => Err(StorageError::SessionNotFound(session_id.to_string())),
            Some(existing) if existing.status == outcome.status => Ok(()),
            Some(existing) if existing.status.is_terminal() => {
                Err(StorageError::ConflictingOutcome {
                    session_id: session_id.to_string(),
                    existing: existing.status,
                    requested: outcome.status,
                })
            }
            Some(existing) => Err(StorageError::InvalidTransition {
                from: existing.status,
                to: outcome.status,
            }),
        }
    }

    fn get_session(
        &self,
        date_key: NaiveDate,
        session_id: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        let key = date_to_key(date_key);
        Ok(self
            .query_sessions("WHERE date_key = ?1 AND session_id = ?2", params![key, session_id])?
            .into_iter()
            .next())
    }

    fn get_slot_session(
        &self,
        date_key: NaiveDate,
        slot_name: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        let key = date_to_key(date_key);
        Ok(self
            .query_sessions("WHERE date_key = ?1 AND slot_name = ?2", params![key, slot_name])?
            .into_iter()
            .next())
    }

    fn sessions_for_date(&self, date_key: NaiveDate) -> StorageResult<Vec<SessionRecord>> {
        let key = date_to_key(date_key);
        self.query_sessions("WHERE date_key = ?1 ORDER BY slot_name", params![key])
    }

    // ===== Area Assignment =====

    fn load_assignment(
        &self,
        date_key: NaiveDate,
        slot_name: &str,
    ) -> StorageResult<Option<Vec<String>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT areas FROM area_assignments WHERE date_key = ?1 AND slot_name = ?2",
                params![date_to_key(date_key), slot_name],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn save_assignment(
        &mut self,
        date_key: NaiveDate,
        slot_name: &str,
        areas: &[String],
    ) -> StorageResult<Vec<String>> {
        let json = serde_json::to_string(areas)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT OR IGNORE INTO area_assignments (date_key, slot_name, areas, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![date_to_key(date_key), slot_name, json, Utc::now().to_rfc3339()],
        )?;

        Ok(self
            .load_assignment(date_key, slot_name)?
            .unwrap_or_else(|| areas.to_vec()))
    }

    // ===== Circuit Breakers =====

    fn load_breaker(&self, host: &str) -> StorageResult<Option<BreakerSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT host, state, failure_count, last_failure_at FROM breaker_states WHERE host = ?1",
                params![host],
                row_to_breaker,
            )
            .optional()?;
        Ok(snapshot.map(|(_, s)| s))
    }

    fn save_breaker(&mut self, host: &str, snapshot: &BreakerSnapshot) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO breaker_states (host, state, failure_count, last_failure_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(host) DO UPDATE SET
                 state = excluded.state,
                 failure_count = excluded.failure_count,
                 last_failure_at = excluded.last_failure_at,
                 updated_at = excluded.updated_at",
            params![
                host,
                snapshot.state.to_db_string(),
                snapshot.failure_count,
                snapshot.last_failure_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_all_breakers(&self) -> StorageResult<Vec<(String, BreakerSnapshot)>> {
        let mut stmt = self.conn.prepare(
            "SELECT host, state, failure_count, last_failure_at FROM breaker_states ORDER BY host",
        )?;
        let breakers = stmt
            .query_map([], row_to_breaker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(breakers)
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let date_str: String = row.get(0)?;
    let date_key =
        NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| conversion_error(0, e))?;

    let areas_json: String = row.get(4)?;
    let assigned_areas: Vec<String> =
        serde_json::from_str(&areas_json).map_err(|e| conversion_error(4, e))?;

    Ok(SessionRecord {
        date_key,
        slot_name: row.get(1)?,
        session_id: row.get(2)?,
        status: SessionStatus::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(SessionStatus::Failed),
        assigned_areas,
        started_at: parse_timestamp(row.get(5)?),
        ended_at: parse_timestamp(row.get(6)?),
        items_processed: row.get(7)?,
        error_count: row.get(8)?,
        stop_reason: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| StopReason::from_db_string(&s)),
        final_risk: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| RiskLevel::from_db_string(&s)),
        config_hash: row.get(11)?,
        error_message: row.get(12)?,
    })
}

fn row_to_breaker(row: &Row<'_>) -> rusqlite::Result<(String, BreakerSnapshot)> {
    let host: String = row.get(0)?;
    // Unknown states are treated as open so a damaged row errs on the side of caution
    let state = BreakerState::from_db_string(&row.get::<_, String>(1)?)
        .unwrap_or(BreakerState::Open);
    Ok((
        host,
        BreakerSnapshot {
            state,
            failure_count: row.get(2)?,
            last_failure_at: parse_timestamp(row.get(3)?),
        },
    ))
}

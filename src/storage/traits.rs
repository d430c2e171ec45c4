//! Storage traits and error types
//!
//! This module defines the trait interface for session state backends and
//! associated error types.

use crate::state::{BreakerSnapshot, SessionStatus};
use crate::storage::{Admission, SessionOutcome, SessionRecord};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session {session_id} already ended as {existing}, cannot record {requested}")]
    ConflictingOutcome {
        session_id: String,
        existing: SessionStatus,
        requested: SessionStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable session state
///
/// `try_begin` is the only cross-invocation guard against running a slot
/// twice, so implementations must perform it as one atomic conditional write.
pub trait SessionStore {
    // ===== Day Planning =====

    /// Creates `scheduled` records for slots that have none yet
    ///
    /// Returns the number of records created.
    fn schedule_day(&mut self, date_key: NaiveDate, slots: &[String]) -> StorageResult<usize>;

    // ===== Session Lifecycle =====

    /// Claims (date_key, slot_name) for `session_id`
    ///
    /// Succeeds only if no record exists or the record is still `scheduled`;
    /// otherwise nothing is written and `Duplicate` is returned.
    fn try_begin(
        &mut self,
        date_key: NaiveDate,
        slot_name: &str,
        session_id: &str,
        config_hash: &str,
    ) -> StorageResult<Admission>;

    /// Records the areas a running session works on
    fn set_assigned_areas(
        &mut self,
        date_key: NaiveDate,
        session_id: &str,
        areas: &[String],
    ) -> StorageResult<()>;

    /// Persists counters of a running session
    fn record_progress(
        &mut self,
        date_key: NaiveDate,
        session_id: &str,
        items_processed: u32,
        error_count: u32,
    ) -> StorageResult<()>;

    /// Moves a running session to its terminal status
    ///
    /// Repeating the same terminal status is a no-op.
    fn complete(
        &mut self,
        date_key: NaiveDate,
        session_id: &str,
        outcome: &SessionOutcome,
    ) -> StorageResult<()>;

    /// Gets a session by its id, which is unique within one day
    fn get_session(
        &self,
        date_key: NaiveDate,
        session_id: &str,
    ) -> StorageResult<Option<SessionRecord>>;

    /// Gets the record for a (date, slot)
    fn get_slot_session(
        &self,
        date_key: NaiveDate,
        slot_name: &str,
    ) -> StorageResult<Option<SessionRecord>>;

    /// Gets every record of one day, ordered by slot name
    fn sessions_for_date(&self, date_key: NaiveDate) -> StorageResult<Vec<SessionRecord>>;

    // ===== Area Assignment =====

    /// Gets the stored area assignment for a (date, slot)
    fn load_assignment(
        &self,
        date_key: NaiveDate,
        slot_name: &str,
    ) -> StorageResult<Option<Vec<String>>>;

    /// Stores an assignment unless one exists, returning the stored one
    fn save_assignment(
        &mut self,
        date_key: NaiveDate,
        slot_name: &str,
        areas: &[String],
    ) -> StorageResult<Vec<String>>;

    // ===== Circuit Breakers =====

    /// Loads the persisted breaker for a host
    fn load_breaker(&self, host: &str) -> StorageResult<Option<BreakerSnapshot>>;

    /// Saves the breaker for a host
    fn save_breaker(&mut self, host: &str, snapshot: &BreakerSnapshot) -> StorageResult<()>;

    /// Loads every persisted breaker, ordered by host
    fn load_all_breakers(&self) -> StorageResult<Vec<(String, BreakerSnapshot)>>;
}

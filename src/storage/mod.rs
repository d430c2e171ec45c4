//! Storage module for persisting session state
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Atomic (date, slot) admission and session records
//! - Per-day area assignments
//! - Circuit breaker state shared across sessions

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{SessionStore, StorageError, StorageResult};

use crate::state::{RiskLevel, SessionStatus, StopReason};
use chrono::{DateTime, NaiveDate, Utc};

/// Result of a `try_begin` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller owns the slot and the record is now `running`
    Admitted,
    /// The slot already ran or is running today; nothing was written
    Duplicate,
}

/// Represents a session in the database
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub date_key: NaiveDate,
    pub slot_name: String,
    /// None while the slot is only `scheduled`
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub assigned_areas: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub items_processed: u32,
    pub error_count: u32,
    pub stop_reason: Option<StopReason>,
    pub final_risk: Option<RiskLevel>,
    pub config_hash: Option<String>,
    pub error_message: Option<String>,
}

/// Terminal data written by `complete`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub items_processed: u32,
    pub error_count: u32,
    pub final_risk: Option<RiskLevel>,
    pub error_message: Option<String>,
}

/// Formats a date the way it is keyed in storage
pub fn date_to_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

//! Output module for session results
//!
//! This module handles:
//! - The stable per-session summary and its JSON file
//! - Writing fetched records as JSON Lines
//! - Printing per-day statistics and breaker state

mod jsonl;
pub mod stats;

pub use jsonl::JsonlSink;
pub use stats::{load_day_statistics, print_breakers, print_day_statistics, DayStatistics};

use crate::state::{RiskLevel, SessionStatus, StopReason};
use crate::storage::date_to_key;
use crate::HarvestError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

/// What one slot invocation produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub date_key: NaiveDate,
    pub slot_name: String,
    #[serde(serialize_with = "as_display")]
    pub status: SessionStatus,
    pub assigned_areas: Vec<String>,
    pub items_processed: u32,
    pub error_count: u32,
    pub records_stored: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(serialize_with = "as_optional_display")]
    pub stop_reason: Option<StopReason>,
    #[serde(serialize_with = "as_optional_display")]
    pub final_risk: Option<RiskLevel>,
    pub error: Option<String>,
}

impl SessionSummary {
    /// Summary of an invocation that found its slot already taken
    pub fn skipped(
        session_id: &str,
        date_key: NaiveDate,
        slot_name: &str,
        started_at: DateTime<Utc>,
    ) -> Self {
        let ended_at = Utc::now();
        Self {
            session_id: session_id.to_string(),
            date_key,
            slot_name: slot_name.to_string(),
            status: SessionStatus::SkippedDuplicate,
            assigned_areas: Vec::new(),
            items_processed: 0,
            error_count: 0,
            records_stored: 0,
            started_at,
            ended_at,
            duration_secs: seconds_between(started_at, ended_at),
            stop_reason: None,
            final_risk: None,
            error: None,
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.status {
            SessionStatus::Failed => 1,
            _ => 0,
        }
    }
}

pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

fn as_display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn as_optional_display<T: Display, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

/// Writes `<records-dir>/<date>/<session_id>.summary.json`
pub fn write_summary(records_dir: &Path, summary: &SessionSummary) -> Result<PathBuf, HarvestError> {
    let dir = records_dir.join(date_to_key(summary.date_key));
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{}.summary.json", summary.session_id));
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(&path, json)?;

    tracing::debug!("Wrote session summary to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> SessionSummary {
        let started_at: DateTime<Utc> = "2025-01-15T07:40:00Z".parse().unwrap();
        let ended_at: DateTime<Utc> = "2025-01-15T07:52:30Z".parse().unwrap();
        SessionSummary {
            session_id: "morning-1-20250115T074000".to_string(),
            date_key: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            slot_name: "morning-1".to_string(),
            status: SessionStatus::Completed,
            assigned_areas: vec!["shibuya".to_string()],
            items_processed: 5,
            error_count: 1,
            records_stored: 4,
            started_at,
            ended_at,
            duration_secs: seconds_between(started_at, ended_at),
            stop_reason: Some(StopReason::MaxItems),
            final_risk: Some(RiskLevel::Low),
            error: None,
        }
    }

    #[test]
    fn test_summary_serializes_status_strings() {
        let value = serde_json::to_value(summary()).unwrap();

        assert_eq!(value["status"], "completed");
        assert_eq!(value["stop_reason"], "max_items");
        assert_eq!(value["final_risk"], "low");
        assert_eq!(value["date_key"], "2025-01-15");
        assert_eq!(value["duration_secs"], 750.0);
        assert!(value["error"].is_null());
    }

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_summary(dir.path(), &summary()).unwrap();

        assert_eq!(
            path,
            dir.path()
                .join("2025-01-15")
                .join("morning-1-20250115T074000.summary.json")
        );
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["items_processed"], 5);
    }

    #[test]
    fn test_skipped_summary() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let skipped = SessionSummary::skipped("s", date, "morning-1", Utc::now());

        assert_eq!(skipped.status, SessionStatus::SkippedDuplicate);
        assert_eq!(skipped.items_processed, 0);
        assert_eq!(skipped.exit_code(), 0);
    }
}

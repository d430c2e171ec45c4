//! Statistics generation from the session database
//!
//! This module provides functionality for extracting and displaying
//! per-day session statistics and breaker state from the storage layer.

use crate::state::{BreakerSnapshot, SessionStatus};
use crate::storage::{SessionRecord, SessionStore};
use crate::HarvestError;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Per-day statistics summary
#[derive(Debug, Clone)]
pub struct DayStatistics {
    pub date: NaiveDate,

    /// Session records ordered by slot name
    pub sessions: Vec<SessionRecord>,

    /// Count of sessions by status
    pub sessions_by_status: HashMap<SessionStatus, u64>,

    pub total_items: u64,
    pub total_errors: u64,
}

/// Loads statistics for one day from storage
pub fn load_day_statistics(
    storage: &dyn SessionStore,
    date: NaiveDate,
) -> Result<DayStatistics, HarvestError> {
    let sessions = storage.sessions_for_date(date)?;

    let mut sessions_by_status = HashMap::new();
    for session in &sessions {
        *sessions_by_status.entry(session.status).or_insert(0) += 1;
    }

    let total_items = sessions.iter().map(|s| s.items_processed as u64).sum();
    let total_errors = sessions.iter().map(|s| s.error_count as u64).sum();

    Ok(DayStatistics {
        date,
        sessions,
        sessions_by_status,
        total_items,
        total_errors,
    })
}

/// Prints day statistics to stdout in a formatted manner
pub fn print_day_statistics(stats: &DayStatistics) {
    println!("=== Sessions for {} ===\n", stats.date);

    if stats.sessions.is_empty() {
        println!("No sessions recorded.");
        return;
    }

    println!(
        "  {:<14} {:<18} {:>6} {:>6} {:<13} {:<7} session",
        "slot", "status", "items", "errors", "stop", "risk"
    );
    for s in &stats.sessions {
        println!(
            "  {:<14} {:<18} {:>6} {:>6} {:<13} {:<7} {}",
            s.slot_name,
            s.status,
            s.items_processed,
            s.error_count,
            s.stop_reason.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
            s.final_risk.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
            s.session_id.as_deref().unwrap_or("-"),
        );
        if let Some(message) = &s.error_message {
            println!("      error: {}", message);
        }
    }
    println!();

    println!("Sessions by Status:");
    let mut status_counts: Vec<_> = stats.sessions_by_status.iter().collect();
    status_counts.sort_by(|a, b| b.1.cmp(a.1));
    for (status, count) in status_counts {
        println!("  {}: {}", status, count);
    }
    println!();

    let error_rate = if stats.total_items > 0 {
        (stats.total_errors as f64 / stats.total_items as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Items: {} processed, {} errors ({:.1}%)",
        stats.total_items, stats.total_errors, error_rate
    );
}

/// Prints persisted breaker states
pub fn print_breakers(breakers: &[(String, BreakerSnapshot)]) {
    println!("=== Circuit Breakers ===\n");

    if breakers.is_empty() {
        println!("No breaker state recorded.");
        return;
    }

    for (host, snapshot) in breakers {
        println!(
            "  {}: {} (consecutive failures: {}, last failure: {})",
            host,
            snapshot.state,
            snapshot.failure_count,
            snapshot
                .last_failure_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into())
        );
    }
}

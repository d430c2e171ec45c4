//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Quiet-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per (date, slot); rows are never deleted by the crawler
CREATE TABLE IF NOT EXISTS sessions (
    date_key TEXT NOT NULL,
    slot_name TEXT NOT NULL,
    session_id TEXT,
    status TEXT NOT NULL,
    assigned_areas TEXT NOT NULL DEFAULT '[]',
    started_at TEXT,
    ended_at TEXT,
    items_processed INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    stop_reason TEXT,
    final_risk TEXT,
    config_hash TEXT,
    error_message TEXT,
    PRIMARY KEY (date_key, slot_name),
    UNIQUE (date_key, session_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

-- Area partition per (date, slot), written once
CREATE TABLE IF NOT EXISTS area_assignments (
    date_key TEXT NOT NULL,
    slot_name TEXT NOT NULL,
    areas TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (date_key, slot_name)
);

-- Circuit breaker state per target host, shared by all sessions
CREATE TABLE IF NOT EXISTS breaker_states (
    host TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_failure_at TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

//! Quiet-Harvest: a session-paced listing crawler
//!
//! This crate runs short, independent crawl sessions spread across a day.
//! Each session is admitted at most once per (date, slot), paces itself like a
//! human visitor, stops hammering a failing host through a circuit breaker,
//! and watches live signals for signs that the target is starting to block it.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Quiet-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Unknown slot: {0}")]
    UnknownSlot(String),

    #[error("Fatal session error: {0}")]
    FatalSession(String),

    #[error("Record sink error: {0}")]
    Sink(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Classified outcome of a failed fetch
///
/// Everything except `CircuitOpen` is a connectivity or content failure that
/// counts against the circuit breaker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// `attempted` counts the real requests made for the item before the refusal
    #[error("Circuit open for {host}, request not attempted")]
    CircuitOpen { host: String, attempted: u32 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed content from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },
}

impl FetchError {
    /// Returns true if this outcome should be fed to `CircuitBreaker::on_failure`
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns true if the attempt may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }
}

/// Result type alias for Quiet-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{SessionScheduler, SessionTrigger};
pub use output::SessionSummary;
pub use state::{BreakerState, CircuitBreaker, RiskLevel, RiskMonitor, SessionStatus};

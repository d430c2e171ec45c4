/// Session lifecycle definitions
///
/// A session record moves `Scheduled -> Running -> Completed | Failed`.
/// `SkippedDuplicate` is only ever reported, never stored: a duplicate
/// invocation leaves the existing record untouched.
use std::fmt;

/// Lifecycle status of one (date, slot) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Planned for the day but not started
    Scheduled,

    /// Admitted and currently crawling
    Running,

    /// Finished normally or left early because of risk, deadline or an open circuit
    Completed,

    /// Ended by an unrecoverable setup error
    Failed,

    /// Another invocation already owns this (date, slot)
    SkippedDuplicate,
}

impl SessionStatus {
    /// Returns true for the states a `complete` call may write
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::SkippedDuplicate => "skipped_duplicate",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped_duplicate" => Some(Self::SkippedDuplicate),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Why the item loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Every assigned item was attempted
    Exhausted,
    /// The per-session item cap was reached
    MaxItems,
    /// The wall-clock budget ran out
    Deadline,
    /// Detection risk stayed high past the grace window
    RiskHigh,
    /// The breaker refused a request; the next slot retries
    CircuitOpen,
}

impl StopReason {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::MaxItems => "max_items",
            Self::Deadline => "deadline",
            Self::RiskHigh => "risk_high",
            Self::CircuitOpen => "circuit_open",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "exhausted" => Some(Self::Exhausted),
            "max_items" => Some(Self::MaxItems),
            "deadline" => Some(Self::Deadline),
            "risk_high" => Some(Self::RiskHigh),
            "circuit_open" => Some(Self::CircuitOpen),
            _ => None,
        }
    }

    /// Returns true if the session left before running out of work
    pub fn is_early_exit(&self) -> bool {
        !matches!(self, Self::Exhausted | Self::MaxItems)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

//! State module for tracking session and target health
//!
//! # Components
//!
//! - `CircuitBreaker`: per-host consecutive-failure gate, shared across sessions
//! - `RiskMonitor`: session-local sliding window of request outcomes
//! - `SessionStatus` / `StopReason`: the session lifecycle

mod breaker;
mod risk;
mod session_state;

// Re-export main types
pub use breaker::{BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use risk::{RiskLevel, RiskMonitor, RiskSample, RiskSignals, SampleKind};
pub use session_state::{SessionStatus, StopReason};

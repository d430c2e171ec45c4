use crate::config::BreakerConfig;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Circuit breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    /// Requests flow normally
    Closed,
    /// Requests are refused until the recovery timeout elapses
    Open,
    /// A single probe request is in flight
    HalfOpen,
}

impl BreakerState {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Persistable view of a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Consecutive-failure circuit breaker for one target host
///
/// All transitions happen under a short-lived lock, so the
/// `Open -> HalfOpen` admission is a compare-and-set: of any number of
/// concurrent callers, exactly one observes `Open` with an elapsed timeout and
/// becomes the probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    host: String,
    failure_threshold: u32,
    recovery_timeout: chrono::Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for `host`
    pub fn new(host: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::from_snapshot(host, config, BreakerSnapshot::default())
    }

    /// Restores a breaker from persisted state
    ///
    /// A persisted `HalfOpen` means the probe's owner never reported back, so
    /// it is restored as `Open` and has to wait out the timeout again.
    pub fn from_snapshot(
        host: impl Into<String>,
        config: &BreakerConfig,
        snapshot: BreakerSnapshot,
    ) -> Self {
        let state = match snapshot.state {
            BreakerState::HalfOpen => BreakerState::Open,
            other => other,
        };
        let last_failure_at = match (state, snapshot.last_failure_at) {
            (BreakerState::Open, None) => Some(Utc::now()),
            (_, at) => at,
        };

        Self {
            host: host.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: chrono::Duration::seconds(config.recovery_timeout_secs as i64),
            inner: Mutex::new(Inner {
                state,
                failure_count: snapshot.failure_count,
                last_failure_at,
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Decides whether a request may be attempted now
    pub fn allow(&self) -> bool {
        self.allow_at(Utc::now())
    }

    /// Decides whether a request may be attempted at `now`
    pub fn allow_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map(|at| now - at >= self.recovery_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                }
                cooled_down
            }
        }
    }

    /// Records a successful attempt
    pub fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state != BreakerState::Closed {
            inner.last_failure_at = None;
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    /// Records a failed attempt
    pub fn on_failure(&self) {
        self.on_failure_at(Utc::now());
    }

    /// Records a failed attempt observed at `now`
    pub fn on_failure_at(&self, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        match inner.state {
            BreakerState::Closed if inner.failure_count >= self.failure_threshold => {
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open);
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        tracing::info!(
            target: "quiet_harvest::metrics",
            event = "breaker_transition",
            host = %self.host,
            from = %from,
            to = %to,
            failure_count = inner.failure_count,
        );
        if to == BreakerState::Open {
            tracing::warn!(
                "Circuit opened for {} after {} consecutive failures",
                self.host,
                inner.failure_count
            );
        }
    }

    // Inner holds plain counters, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Breakers keyed by target host
///
/// One registry is shared by every session running in the process, so
/// overlapping sessions against the same host see the same breaker.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `host`, restoring it with `load` on first use
    pub fn get_or_load<F>(&self, host: &str, load: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> Option<BreakerSnapshot>,
    {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(host.to_string())
            .or_insert_with(|| {
                let snapshot = load().unwrap_or_default();
                Arc::new(CircuitBreaker::from_snapshot(host, &self.config, snapshot))
            })
            .clone()
    }

    pub fn get(&self, host: &str) -> Option<Arc<CircuitBreaker>> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers.get(host).cloned()
    }
}

use crate::config::RiskConfig;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Estimated likelihood that the target is throttling or blocking us
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Where a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// A request that actually hit the network
    Observed,
    /// A request the circuit breaker refused; carries no latency information
    Rejected,
}

/// One per-request observation
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSample {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
    pub kind: SampleKind,
}

impl RiskSample {
    pub fn observed(latency: Duration, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            latency_ms: latency.as_millis() as u64,
            success,
            kind: SampleKind::Observed,
        }
    }

    /// A synthetic zero-latency failure for a breaker rejection
    pub fn rejected() -> Self {
        Self {
            timestamp: Utc::now(),
            latency_ms: 0,
            success: false,
            kind: SampleKind::Rejected,
        }
    }
}

/// Signals derived from the current window
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSignals {
    pub samples: usize,
    pub error_rate: f64,
    /// Mean latency of successful observed samples
    pub avg_latency_ms: Option<f64>,
    /// Recent-third mean latency divided by earliest-third mean latency
    pub latency_trend: Option<f64>,
}

/// Session-local sliding window of request outcomes
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    config: RiskConfig,
    window: VecDeque<RiskSample>,
}

impl RiskMonitor {
    pub fn new(config: RiskConfig) -> Self {
        let capacity = config.window_size;
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Adds a sample, evicting the oldest beyond the window size
    pub fn record(&mut self, sample: RiskSample) {
        self.window.push_back(sample);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn current_risk(&self) -> RiskLevel {
        self.current_risk_at(Utc::now())
    }

    /// Classifies the window as of `now`; the highest firing signal wins
    pub fn current_risk_at(&self, now: DateTime<Utc>) -> RiskLevel {
        let signals = self.signals_at(now);
        let mut level = RiskLevel::Low;

        if signals.samples < self.config.min_samples {
            return level;
        }

        if signals.error_rate > self.config.high_error_rate {
            level = level.max(RiskLevel::High);
        } else if signals.error_rate >= self.config.medium_error_rate {
            level = level.max(RiskLevel::Medium);
        }

        if let Some(avg) = signals.avg_latency_ms {
            if avg < self.config.fast_latency_ms as f64 {
                level = level.max(RiskLevel::Medium);
            }
        }

        if let Some(trend) = signals.latency_trend {
            if trend >= self.config.trend_ratio {
                level = level.max(RiskLevel::Medium);
            }
        }

        level
    }

    pub fn signals(&self) -> RiskSignals {
        self.signals_at(Utc::now())
    }

    pub fn signals_at(&self, now: DateTime<Utc>) -> RiskSignals {
        let live: Vec<&RiskSample> = self.live_samples(now).collect();

        let samples = live.len();
        let failures = live.iter().filter(|s| !s.success).count();
        let error_rate = if samples > 0 {
            failures as f64 / samples as f64
        } else {
            0.0
        };

        let latencies: Vec<f64> = live
            .iter()
            .filter(|s| s.success && s.kind == SampleKind::Observed)
            .map(|s| s.latency_ms as f64)
            .collect();

        // "Sustained" means enough successful samples to trust the mean
        let avg_latency_ms = if latencies.len() >= self.config.min_samples.max(1) {
            Some(mean(&latencies))
        } else {
            None
        };

        RiskSignals {
            samples,
            error_rate,
            avg_latency_ms,
            latency_trend: latency_trend(&latencies),
        }
    }

    fn live_samples(&self, now: DateTime<Utc>) -> impl Iterator<Item = &RiskSample> {
        let cutoff = if self.config.max_sample_age_secs > 0 {
            Some(now - chrono::Duration::seconds(self.config.max_sample_age_secs as i64))
        } else {
            None
        };
        self.window
            .iter()
            .filter(move |s| cutoff.map(|c| s.timestamp >= c).unwrap_or(true))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Needs at least two samples in each third
fn latency_trend(latencies: &[f64]) -> Option<f64> {
    let third = latencies.len() / 3;
    if third < 2 {
        return None;
    }

    let early = mean(&latencies[..third]);
    let recent = mean(&latencies[latencies.len() - third..]);
    if early <= 0.0 {
        return None;
    }

    Some(recent / early)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> RiskMonitor {
        RiskMonitor::new(RiskConfig::default())
    }

    fn fill(monitor: &mut RiskMonitor, total: usize, failures: usize, latency_ms: u64) {
        for i in 0..total {
            let success = i >= failures;
            monitor.record(RiskSample::observed(
                Duration::from_millis(latency_ms),
                success,
            ));
        }
    }

    #[test]
    fn test_empty_window_is_low() {
        assert_eq!(monitor().current_risk(), RiskLevel::Low);
    }

    #[test]
    fn test_seven_of_twenty_failures_is_high() {
        let mut monitor = monitor();
        fill(&mut monitor, 20, 7, 2_000);

        assert!((monitor.signals().error_rate - 0.35).abs() < 1e-9);
        assert_eq!(monitor.current_risk(), RiskLevel::High);
    }

    #[test]
    fn test_three_of_twenty_failures_is_at_least_medium() {
        let mut monitor = monitor();
        fill(&mut monitor, 20, 3, 2_000);

        assert!(monitor.current_risk() >= RiskLevel::Medium);
    }

    #[test]
    fn test_healthy_window_is_low() {
        let mut monitor = monitor();
        fill(&mut monitor, 20, 0, 2_000);

        let signals = monitor.signals();
        assert_eq!(signals.error_rate, 0.0);
        assert_eq!(signals.avg_latency_ms, Some(2_000.0));
        assert_eq!(monitor.current_risk(), RiskLevel::Low);
    }

    #[test]
    fn test_suspiciously_fast_responses_are_medium() {
        let mut monitor = monitor();
        fill(&mut monitor, 10, 0, 120);

        assert_eq!(monitor.current_risk(), RiskLevel::Medium);
    }

    #[test]
    fn test_fast_signal_needs_enough_samples() {
        let mut monitor = monitor();
        monitor.record(RiskSample::observed(Duration::from_millis(50), true));
        monitor.record(RiskSample::observed(Duration::from_millis(50), true));

        assert_eq!(monitor.signals().avg_latency_ms, None);
        assert_eq!(monitor.current_risk(), RiskLevel::Low);
    }

    #[test]
    fn test_rising_latency_trend_is_medium() {
        let mut monitor = monitor();
        for latency in [1_000, 1_000, 1_100, 1_500, 2_000, 2_500, 3_000, 3_000, 3_200] {
            monitor.record(RiskSample::observed(Duration::from_millis(latency), true));
        }

        let trend = monitor.signals().latency_trend.unwrap();
        assert!(trend > 2.0);
        assert_eq!(monitor.current_risk(), RiskLevel::Medium);
    }

    #[test]
    fn test_rejections_count_as_errors_but_not_latency() {
        let mut monitor = monitor();
        fill(&mut monitor, 6, 0, 2_000);
        for _ in 0..4 {
            monitor.record(RiskSample::rejected());
        }

        let signals = monitor.signals();
        assert!((signals.error_rate - 0.4).abs() < 1e-9);
        assert_eq!(signals.avg_latency_ms, Some(2_000.0));
        assert_eq!(monitor.current_risk(), RiskLevel::High);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut monitor = monitor();
        fill(&mut monitor, 10, 10, 2_000);
        fill(&mut monitor, 20, 0, 2_000);

        assert_eq!(monitor.len(), 20);
        assert_eq!(monitor.current_risk(), RiskLevel::Low);
    }

    #[test]
    fn test_old_samples_expire() {
        let mut monitor = monitor();
        let stale = Utc::now() - chrono::Duration::hours(1);
        for _ in 0..10 {
            monitor.record(RiskSample {
                timestamp: stale,
                latency_ms: 0,
                success: false,
                kind: SampleKind::Observed,
            });
        }

        assert_eq!(monitor.signals().samples, 0);
        assert_eq!(monitor.current_risk(), RiskLevel::Low);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(RiskLevel::from_db_string("medium"), Some(RiskLevel::Medium));
    }
}

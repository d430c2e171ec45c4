use serde::Deserialize;

/// Main configuration structure for Quiet-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "slot")]
    pub slots: Vec<SlotEntry>,
    #[serde(default, rename = "area")]
    pub areas: Vec<AreaEntry>,
    #[serde(default, rename = "entry-point")]
    pub entry_points: Vec<EntryPointEntry>,
    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileEntry>,
}

/// The crawl target
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Base URL every entry point and area path is resolved against
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Treat non-HTML responses as malformed content
    #[serde(rename = "require-html", default = "default_true")]
    pub require_html: bool,
}

/// Per-session limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionConfig {
    /// Wall-clock budget, checked between items
    pub max_runtime_minutes: u64,

    /// Maximum number of item fetch attempts per session
    pub max_properties: u32,

    /// Consecutive item failures before the first success that make the session fatal
    ///
    /// Zero disables the rule.
    pub fatal_initial_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_runtime_minutes: 14,
            max_properties: 40,
            fatal_initial_failures: 1,
        }
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Cooldown before a single probe is let through (seconds)
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

/// What to do once high risk outlasts the grace window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighRiskAction {
    /// End the session early as completed
    Complete,
    /// Keep going with the high-risk delay multiplier
    Throttle,
}

/// Detection risk thresholds and policy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RiskConfig {
    /// Maximum number of samples kept in the window
    pub window_size: usize,

    /// Samples older than this are dropped (seconds, 0 disables)
    pub max_sample_age_secs: u64,

    /// Below this many samples every signal reports low
    pub min_samples: usize,

    /// error_rate strictly above this is high
    pub high_error_rate: f64,

    /// error_rate at or above this is at least medium
    pub medium_error_rate: f64,

    /// Average successful latency below this is suspiciously fast (milliseconds)
    pub fast_latency_ms: u64,

    /// Recent-third over earliest-third latency ratio that counts as a rising trend
    pub trend_ratio: f64,

    /// Consecutive high-risk item checks tolerated before `high_risk_action` applies
    pub high_risk_grace_items: u32,

    pub high_risk_action: HighRiskAction,

    pub medium_delay_multiplier: f64,

    pub high_delay_multiplier: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            max_sample_age_secs: 900,
            min_samples: 3,
            high_error_rate: 0.30,
            medium_error_rate: 0.15,
            fast_latency_ms: 500,
            trend_ratio: 2.0,
            high_risk_grace_items: 3,
            high_risk_action: HighRiskAction::Complete,
            medium_delay_multiplier: 1.5,
            high_delay_multiplier: 2.0,
        }
    }
}

/// A uniform delay range in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }
}

/// Delay ranges per pacing context
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PacingConfig {
    pub between_items: DelayRange,
    pub between_areas: DelayRange,
    pub after_navigation: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            between_items: DelayRange::new(15_000, 180_000),
            between_areas: DelayRange::new(5_000, 15_000),
            after_navigation: DelayRange::new(3_000, 8_000),
        }
    }
}

/// HTTP behaviour of the fetch engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,

    /// Extra attempts for transient failures
    pub max_retries: u32,

    /// First retry waits around this long, doubling afterwards, plus jitter
    pub backoff_base_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_retries: 2,
            backoff_base_ms: 2_000,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving record and summary files
    #[serde(rename = "records-dir")]
    pub records_dir: String,
}

/// A fixed daily slot
#[derive(Debug, Clone, Deserialize)]
pub struct SlotEntry {
    /// Logical slot name (e.g. "morning-1")
    pub name: String,

    /// Target local time as "HH:MM"
    pub time: String,
}

/// A crawlable area of the target
#[derive(Debug, Clone, Deserialize)]
pub struct AreaEntry {
    /// Stable area identifier
    pub id: String,

    /// Listing path relative to the base URL
    pub path: String,

    /// Number of listing pages in this area
    #[serde(default = "default_pages")]
    pub pages: u32,
}

/// A starting page a session may navigate to first
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointEntry {
    pub name: String,
    pub path: String,
}

/// A browser header preset
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    pub name: String,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "accept-language", default = "default_accept_language")]
    pub accept_language: String,
}

fn default_true() -> bool {
    true
}

fn default_pages() -> u32 {
    1
}

fn default_accept_language() -> String {
    "ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}

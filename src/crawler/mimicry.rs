//! Human-plausible pacing and session identity
//!
//! Every session picks one entry point and one browser profile up front and
//! then draws its delays from per-context uniform ranges.

use crate::config::{Config, DelayRange, PacingConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// A page a visitor would plausibly land on first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub path: String,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Entry points used when the configuration lists none
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("home", "/"),
            Self::new("search", "/search"),
            Self::new("new-arrivals", "/new"),
        ]
    }
}

/// Immutable header preset chosen once per session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfile {
    pub name: String,
    pub user_agent: String,
    pub accept_language: String,
    pub accept: String,
}

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const DEFAULT_ACCEPT_LANGUAGE: &str = "ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7";

impl BrowserProfile {
    pub fn new(
        name: impl Into<String>,
        user_agent: impl Into<String>,
        accept_language: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
            accept: ACCEPT_HTML.to_string(),
        }
    }

    /// Desktop presets used when the configuration lists none
    pub fn presets() -> Vec<Self> {
        vec![
            Self::new(
                "chrome-mac",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
                DEFAULT_ACCEPT_LANGUAGE,
            ),
            Self::new(
                "chrome-windows",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
                DEFAULT_ACCEPT_LANGUAGE,
            ),
            Self::new(
                "safari-mac",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
                DEFAULT_ACCEPT_LANGUAGE,
            ),
            Self::new(
                "firefox-windows",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
                DEFAULT_ACCEPT_LANGUAGE,
            ),
        ]
    }
}

/// Which pause is being drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayContext {
    BetweenItems,
    BetweenAreas,
    AfterNavigation,
}

/// Randomised choices for one session
pub struct MimicryEngine {
    pacing: PacingConfig,
    entry_points: Vec<EntryPoint>,
    profiles: Vec<BrowserProfile>,
    rng: StdRng,
}

impl MimicryEngine {
    /// Creates an engine seeded from OS entropy
    pub fn new(
        pacing: PacingConfig,
        entry_points: Vec<EntryPoint>,
        profiles: Vec<BrowserProfile>,
    ) -> Self {
        Self::with_rng(pacing, entry_points, profiles, StdRng::from_entropy())
    }

    /// Creates an engine with a fixed seed, for reproducible runs
    pub fn seeded(
        pacing: PacingConfig,
        entry_points: Vec<EntryPoint>,
        profiles: Vec<BrowserProfile>,
        seed: u64,
    ) -> Self {
        Self::with_rng(pacing, entry_points, profiles, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        pacing: PacingConfig,
        entry_points: Vec<EntryPoint>,
        profiles: Vec<BrowserProfile>,
        rng: StdRng,
    ) -> Self {
        let entry_points = if entry_points.is_empty() {
            EntryPoint::defaults()
        } else {
            entry_points
        };
        let profiles = if profiles.is_empty() {
            BrowserProfile::presets()
        } else {
            profiles
        };

        Self {
            pacing,
            entry_points,
            profiles,
            rng,
        }
    }

    /// Builds an engine from the `[pacing]`, `[[entry-point]]` and `[[profile]]` sections
    pub fn from_config(config: &Config, seed: Option<u64>) -> Self {
        let entry_points = config
            .entry_points
            .iter()
            .map(|e| EntryPoint::new(&e.name, &e.path))
            .collect();
        let profiles = config
            .profiles
            .iter()
            .map(|p| BrowserProfile::new(&p.name, &p.user_agent, &p.accept_language))
            .collect();

        let pacing = config.pacing.clone();
        match seed {
            Some(seed) => Self::seeded(pacing, entry_points, profiles, seed),
            None => Self::new(pacing, entry_points, profiles),
        }
    }

    /// Picks an entry point uniformly at random
    pub fn select_entry_point(&mut self) -> EntryPoint {
        self.entry_points
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| EntryPoint::new("home", "/"))
    }

    /// Picks a browser profile uniformly at random
    pub fn select_profile(&mut self) -> BrowserProfile {
        match self.profiles.choose(&mut self.rng) {
            Some(profile) => profile.clone(),
            None => BrowserProfile::presets().remove(0),
        }
    }

    /// Draws a delay uniformly from the context's configured range
    pub fn next_delay(&mut self, context: DelayContext) -> Duration {
        let range = self.range(context);
        Duration::from_millis(self.draw(range))
    }

    fn range(&self, context: DelayContext) -> DelayRange {
        match context {
            DelayContext::BetweenItems => self.pacing.between_items,
            DelayContext::BetweenAreas => self.pacing.between_areas,
            DelayContext::AfterNavigation => self.pacing.after_navigation,
        }
    }

    fn draw(&mut self, range: DelayRange) -> u64 {
        if range.max_ms <= range.min_ms {
            return range.min_ms;
        }
        self.rng.gen_range(range.min_ms..=range.max_ms)
    }
}

//! Session coordinator - one slot invocation from admission to summary
//!
//! A session moves through:
//! - Admission: the atomic `try_begin` on (date, slot)
//! - Area assignment: the slot's share of the day's partition
//! - Navigation: one entry-point fetch, then a pause
//! - Item loop: delay, fetch, hand off, progress, risk check
//! - Finalization: terminal record, breaker state, summary

use crate::config::{validate_session_id, Config, HighRiskAction};
use crate::crawler::assignment::{areas_for_slot, assign_areas, SlotPlan};
use crate::crawler::fetcher::{build_http_client, FetchEngine, Target};
use crate::crawler::mimicry::{DelayContext, MimicryEngine};
use crate::crawler::sink::{FetchedRecord, ItemSource, RecordSink, SinkOutcome};
use crate::output::{seconds_between, SessionSummary};
use crate::state::{
    BreakerRegistry, CircuitBreaker, RiskLevel, RiskMonitor, SessionStatus, StopReason,
};
use crate::storage::{Admission, SessionOutcome, SessionStore, SqliteStorage};
use crate::{ConfigError, FetchError, HarvestError};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use url::Url;

/// Parameters of one slot invocation
#[derive(Debug, Clone)]
pub struct SessionTrigger {
    pub slot_name: String,
    pub date: NaiveDate,

    /// Generated as `<slot>-<YYYYmmddTHHMMSS>` when absent
    pub session_id: Option<String>,

    /// Overrides `[session] max-properties`
    pub max_properties: Option<u32>,

    /// Overrides the day's area assignment
    pub areas: Option<Vec<String>>,

    /// Overrides `[session] max-runtime-minutes`
    pub max_runtime: Option<Duration>,
}

impl SessionTrigger {
    pub fn new(slot_name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            slot_name: slot_name.into(),
            date,
            session_id: None,
            max_properties: None,
            areas: None,
            max_runtime: None,
        }
    }

    /// The explicit session id, or a fresh timestamped one
    pub fn resolve_session_id(&self) -> String {
        self.session_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                self.slot_name,
                chrono::Local::now().format("%Y%m%dT%H%M%S")
            )
        })
    }
}

/// Counters of a running session, kept outside the loop so a fatal error
/// still reports how far it got
#[derive(Debug, Default)]
struct Progress {
    areas: Vec<String>,
    items_processed: u32,
    error_count: u32,
    records_stored: u32,
    final_risk: Option<RiskLevel>,
}

/// Top-level driver invoked once per slot
pub struct SessionScheduler {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    breakers: Arc<BreakerRegistry>,
    plan: SlotPlan,
    base_url: Url,
    host: String,
    config_hash: String,
    mimicry_seed: Option<u64>,
}

impl SessionScheduler {
    /// Creates a scheduler that opens the configured database
    pub fn new(config: Config, config_hash: impl Into<String>) -> Result<Self, HarvestError> {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        Self::with_storage(config, config_hash, Arc::new(Mutex::new(storage)), breakers)
    }

    /// Creates a scheduler over shared storage and breakers
    ///
    /// Schedulers that share a registry see the same breaker per host.
    pub fn with_storage(
        config: Config,
        config_hash: impl Into<String>,
        storage: Arc<Mutex<SqliteStorage>>,
        breakers: Arc<BreakerRegistry>,
    ) -> Result<Self, HarvestError> {
        let plan = SlotPlan::from_config(&config.slots)?;
        let base_url = Url::parse(&config.target.base_url)?;
        let host = match (base_url.host_str(), base_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ConfigError::InvalidUrl(config.target.base_url.clone()).into());
            }
        };

        Ok(Self {
            config: Arc::new(config),
            storage,
            breakers,
            plan,
            base_url,
            host,
            config_hash: config_hash.into(),
            mimicry_seed: None,
        })
    }

    /// Fixes the mimicry seed, for reproducible pacing
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.mimicry_seed = Some(seed);
        self
    }

    pub fn plan(&self) -> &SlotPlan {
        &self.plan
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Breaker key for the target
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn storage(&self) -> Arc<Mutex<SqliteStorage>> {
        self.storage.clone()
    }

    /// The day's partition as it would be derived, without writing it
    pub fn preview_assignment(&self, date: NaiveDate) -> BTreeMap<String, Vec<String>> {
        assign_areas(date, &self.plan.names(), &self.area_ids())
    }

    /// Loads the slot's assignment, deriving and storing it on first use
    pub fn assignment_for(
        &self,
        date: NaiveDate,
        slot_name: &str,
    ) -> Result<Vec<String>, HarvestError> {
        if let Some(stored) = self.lock_storage().load_assignment(date, slot_name)? {
            return Ok(stored);
        }

        let derived =
            areas_for_slot(date, &self.plan, &self.area_ids(), slot_name).unwrap_or_default();
        let stored = self
            .lock_storage()
            .save_assignment(date, slot_name, &derived)?;
        Ok(stored)
    }

    /// Runs one slot invocation
    ///
    /// # Returns
    ///
    /// * `Ok(SessionSummary)` - the session was skipped, completed or failed
    /// * `Err(HarvestError)` - the slot or session id is invalid, or admission could
    ///   not be decided
    pub async fn run(
        &self,
        trigger: &SessionTrigger,
        source: &mut dyn ItemSource,
        sink: &mut dyn RecordSink,
    ) -> Result<SessionSummary, HarvestError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        if self.plan.get(&trigger.slot_name).is_none() {
            return Err(HarvestError::UnknownSlot(trigger.slot_name.clone()));
        }
        let session_id = trigger.resolve_session_id();
        validate_session_id(&session_id)?;

        let admission = {
            let mut storage = self.lock_storage();
            storage.schedule_day(trigger.date, &self.plan.names())?;
            storage.try_begin(trigger.date, &trigger.slot_name, &session_id, &self.config_hash)?
        };

        if admission == Admission::Duplicate {
            tracing::info!(
                "Slot {} on {} already ran or is running, skipping",
                trigger.slot_name,
                trigger.date
            );
            return Ok(SessionSummary::skipped(
                &session_id,
                trigger.date,
                &trigger.slot_name,
                started_at,
            ));
        }

        tracing::info!(
            "Session {} admitted for slot {} on {}",
            session_id,
            trigger.slot_name,
            trigger.date
        );

        let mut progress = Progress::default();
        let result = self
            .execute(trigger, &session_id, clock, source, sink, &mut progress)
            .await;

        if let Err(e) = sink.finish() {
            tracing::warn!("Record sink failed to finish: {}", e);
        }

        let (status, stop_reason, error) = match result {
            Ok(reason) => {
                if reason.is_early_exit() {
                    tracing::info!("Session {} ended early: {}", session_id, reason);
                }
                (SessionStatus::Completed, Some(reason), None)
            }
            Err(e) => {
                tracing::error!("Session {} failed: {}", session_id, e);
                (SessionStatus::Failed, None, Some(e.to_string()))
            }
        };

        let outcome = SessionOutcome {
            status,
            stop_reason,
            items_processed: progress.items_processed,
            error_count: progress.error_count,
            final_risk: progress.final_risk,
            error_message: error.clone(),
        };
        {
            let mut storage = self.lock_storage();
            storage.complete(trigger.date, &session_id, &outcome)?;
        }
        self.save_breaker_state();

        let ended_at = Utc::now();
        let summary = SessionSummary {
            session_id,
            date_key: trigger.date,
            slot_name: trigger.slot_name.clone(),
            status,
            assigned_areas: progress.areas,
            items_processed: progress.items_processed,
            error_count: progress.error_count,
            records_stored: progress.records_stored,
            started_at,
            ended_at,
            duration_secs: seconds_between(started_at, ended_at),
            stop_reason,
            final_risk: progress.final_risk,
            error,
        };

        emit_session_metrics(&summary);
        Ok(summary)
    }

    async fn execute(
        &self,
        trigger: &SessionTrigger,
        session_id: &str,
        clock: Instant,
        source: &mut dyn ItemSource,
        sink: &mut dyn RecordSink,
        progress: &mut Progress,
    ) -> Result<StopReason, HarvestError> {
        let session = &self.config.session;
        let max_items = trigger.max_properties.unwrap_or(session.max_properties);
        let max_runtime = trigger.max_runtime.unwrap_or_else(|| {
            Duration::from_secs(session.max_runtime_minutes.saturating_mul(60))
        });

        // Area assignment
        progress.areas = match &trigger.areas {
            Some(areas) => areas.clone(),
            None => self
                .assignment_for(trigger.date, &trigger.slot_name)
                .map_err(|e| fatal("area assignment", e))?,
        };
        self.lock_storage()
            .set_assigned_areas(trigger.date, session_id, &progress.areas)?;

        let mut targets = Vec::new();
        for area in &progress.areas {
            targets.extend(source.items(area).map_err(|e| fatal("area expansion", e))?);
        }
        tracing::info!(
            "Assigned {} areas ({} items): {}",
            progress.areas.len(),
            targets.len(),
            progress.areas.join(", ")
        );

        // Session identity
        let breaker = self.breaker()?;
        let mut mimicry = MimicryEngine::from_config(&self.config, self.mimicry_seed);
        let profile = mimicry.select_profile();
        let client =
            build_http_client(&profile, &self.config.fetch).map_err(|e| fatal("http client", e))?;
        let engine = FetchEngine::new(
            client,
            breaker,
            self.config.fetch.clone(),
            self.config.target.require_html,
        );
        let mut monitor = RiskMonitor::new(self.config.risk.clone());
        tracing::debug!("Using browser profile {}", profile.name);

        // Navigation
        let entry = mimicry.select_entry_point();
        let entry_url = self.base_url.join(&entry.path)?;
        tracing::info!("Navigating to entry point {} ({})", entry.name, entry_url);
        match engine
            .fetch(&Target::new(entry.name.as_str(), entry_url), &mut monitor)
            .await
        {
            Ok(_) => {}
            Err(e @ FetchError::CircuitOpen { .. }) => {
                tracing::warn!("{}; leaving the retry to the next slot", e);
                progress.final_risk = Some(monitor.current_risk());
                return Ok(StopReason::CircuitOpen);
            }
            Err(e) => return Err(fatal("entry point navigation", e)),
        }
        self.save_breaker_state();
        tokio::time::sleep(mimicry.next_delay(DelayContext::AfterNavigation)).await;

        // Item loop
        let mut attempted: u32 = 0;
        let mut succeeded = false;
        let mut initial_failures: u32 = 0;
        let mut high_streak: u32 = 0;
        let mut risk = monitor.current_risk();
        let mut previous_area: Option<&str> = None;
        progress.final_risk = Some(risk);

        for target in &targets {
            if attempted >= max_items {
                tracing::info!("Reached the limit of {} items", max_items);
                return Ok(StopReason::MaxItems);
            }
            if clock.elapsed() >= max_runtime {
                tracing::info!("Runtime budget of {:?} spent", max_runtime);
                return Ok(StopReason::Deadline);
            }

            let context = delay_context(previous_area, &target.area);
            let delay = self.throttle(mimicry.next_delay(context), risk);
            tracing::debug!("Waiting {:?} before {}", delay, target.url);
            tokio::time::sleep(delay).await;

            if clock.elapsed() >= max_runtime {
                tracing::info!("Runtime budget of {:?} spent", max_runtime);
                return Ok(StopReason::Deadline);
            }

            attempted += 1;
            previous_area = Some(target.area.as_str());

            match engine.fetch(target, &mut monitor).await {
                Ok(content) => {
                    succeeded = true;
                    progress.items_processed += 1;
                    let record = FetchedRecord::new(
                        session_id,
                        trigger.date,
                        &trigger.slot_name,
                        target,
                        content,
                    );
                    match sink.accept(record) {
                        Ok(SinkOutcome::Stored) => progress.records_stored += 1,
                        Ok(SinkOutcome::NoData) => {
                            tracing::debug!("No data on {}", target.url);
                        }
                        Err(e) => {
                            progress.error_count += 1;
                            tracing::warn!("Record sink rejected {}: {}", target.url, e);
                        }
                    }
                }
                Err(FetchError::CircuitOpen { host, attempted }) => {
                    // Refused on a retry: the item already failed on the network
                    if attempted > 0 {
                        progress.error_count += 1;
                    }
                    tracing::warn!(
                        "Circuit open for {} after {} attempts on {}; ending the session early",
                        host,
                        attempted,
                        target.url
                    );
                    self.finish_item(trigger.date, session_id, progress, &monitor)?;
                    return Ok(StopReason::CircuitOpen);
                }
                Err(e) => {
                    progress.error_count += 1;
                    tracing::warn!("Item {} failed: {}", target.url, e);

                    if !succeeded {
                        initial_failures += 1;
                        let limit = session.fatal_initial_failures;
                        if limit > 0 && initial_failures >= limit {
                            self.finish_item(trigger.date, session_id, progress, &monitor)?;
                            return Err(fatal("first fetch", e));
                        }
                    }
                }
            }

            self.finish_item(trigger.date, session_id, progress, &monitor)?;

            let level = monitor.current_risk();
            if level != risk {
                tracing::info!("Detection risk changed from {} to {}", risk, level);
                risk = level;
            }

            if risk == RiskLevel::High {
                high_streak += 1;
                if high_streak > self.config.risk.high_risk_grace_items
                    && self.config.risk.high_risk_action == HighRiskAction::Complete
                {
                    tracing::warn!(
                        "Detection risk high for {} consecutive items, ending the session early",
                        high_streak
                    );
                    return Ok(StopReason::RiskHigh);
                }
            } else {
                high_streak = 0;
            }
        }

        tracing::info!("All {} assigned items attempted", attempted);
        Ok(StopReason::Exhausted)
    }

    /// Persists progress and breaker state after one item
    fn finish_item(
        &self,
        date: NaiveDate,
        session_id: &str,
        progress: &mut Progress,
        monitor: &RiskMonitor,
    ) -> Result<(), HarvestError> {
        progress.final_risk = Some(monitor.current_risk());
        self.lock_storage().record_progress(
            date,
            session_id,
            progress.items_processed,
            progress.error_count,
        )?;
        self.save_breaker_state();
        Ok(())
    }

    fn throttle(&self, delay: Duration, risk: RiskLevel) -> Duration {
        let multiplier = match risk {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => self.config.risk.medium_delay_multiplier,
            RiskLevel::High => self.config.risk.high_delay_multiplier,
        };
        delay.mul_f64(multiplier)
    }

    fn breaker(&self) -> Result<Arc<CircuitBreaker>, HarvestError> {
        let snapshot = self.lock_storage().load_breaker(&self.host)?;
        Ok(self.breakers.get_or_load(&self.host, || snapshot))
    }

    fn save_breaker_state(&self) {
        let Some(breaker) = self.breakers.get(&self.host) else {
            return;
        };
        let snapshot = breaker.snapshot();
        if let Err(e) = self.lock_storage().save_breaker(&self.host, &snapshot) {
            tracing::warn!("Failed to persist breaker for {}: {}", self.host, e);
        }
    }

    fn area_ids(&self) -> Vec<String> {
        self.config.areas.iter().map(|a| a.id.clone()).collect()
    }

    // The store holds no invariant a panicking writer could break halfway.
    fn lock_storage(&self) -> MutexGuard<'_, SqliteStorage> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pause kind before fetching an item of `area`
fn delay_context(previous_area: Option<&str>, area: &str) -> DelayContext {
    match previous_area {
        Some(previous) if previous != area => DelayContext::BetweenAreas,
        _ => DelayContext::BetweenItems,
    }
}

fn fatal(stage: &str, error: impl std::fmt::Display) -> HarvestError {
    HarvestError::FatalSession(format!("{} failed: {}", stage, error))
}

fn emit_session_metrics(summary: &SessionSummary) {
    tracing::info!(
        target: "quiet_harvest::metrics",
        event = "session_finished",
        session_id = %summary.session_id,
        slot = %summary.slot_name,
        status = %summary.status,
        items = summary.items_processed,
        errors = summary.error_count,
        records = summary.records_stored,
        stop_reason = summary.stop_reason.map(|r| r.to_db_string()).unwrap_or("none"),
        final_risk = summary.final_risk.map(|r| r.to_db_string()).unwrap_or("none"),
        duration_secs = summary.duration_secs,
    );
    tracing::info!(
        "Session {} {}: {} items, {} errors in {:.1}s",
        summary.session_id,
        summary.status,
        summary.items_processed,
        summary.error_count,
        summary.duration_secs
    );
}

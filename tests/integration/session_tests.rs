//! Integration tests for slot sessions
//!
//! These tests use wiremock as the target host and run full sessions
//! end-to-end against a temporary database with pacing disabled.

use chrono::NaiveDate;
use quiet_harvest::config::{parse_config, Config};
use quiet_harvest::crawler::{MemorySink, PagedAreaSource, SessionScheduler, SessionTrigger};
use quiet_harvest::output::{write_summary, JsonlSink};
use quiet_harvest::state::{BreakerState, SessionStatus, StopReason};
use quiet_harvest::storage::SessionStore;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Tuning {
    max_properties: u32,
    fatal_initial_failures: u32,
    failure_threshold: u32,
    high_risk_action: &'static str,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_properties: 40,
            fatal_initial_failures: 1,
            failure_threshold: 5,
            high_risk_action: "complete",
        }
    }
}

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str, dir: &Path, tuning: &Tuning) -> Config {
    let toml = format!(
        r#"
[target]
base-url = "{base_url}"

[session]
max-properties = {max_properties}
fatal-initial-failures = {fatal}

[breaker]
failure-threshold = {threshold}
recovery-timeout-secs = 60

[risk]
high-risk-action = "{action}"

[pacing]
between-items = {{ min-ms = 0, max-ms = 0 }}
between-areas = {{ min-ms = 0, max-ms = 0 }}
after-navigation = {{ min-ms = 0, max-ms = 0 }}

[fetch]
request-timeout-ms = 300
connect-timeout-ms = 300
max-retries = 2
backoff-base-ms = 0

[output]
database-path = "{db}"
records-dir = "{records}"

[[slot]]
name = "morning-1"
time = "07:40"

[[slot]]
name = "noon-1"
time = "12:10"

[[area]]
id = "big"
path = "/area/big/list"
pages = 50

[[area]]
id = "small"
path = "/area/small/list"
pages = 2

[[entry-point]]
name = "home"
path = "/"
"#,
        base_url = base_url,
        max_properties = tuning.max_properties,
        fatal = tuning.fatal_initial_failures,
        threshold = tuning.failure_threshold,
        action = tuning.high_risk_action,
        db = dir.join("harvest.db").display(),
        records = dir.join("records").display(),
    );
    parse_config(&toml).expect("test config should be valid")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

async fn mount_home(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body>home</body></html>"))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, prefix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().starts_with(prefix))
        .count()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

fn trigger(slot: &str, areas: &[&str]) -> SessionTrigger {
    let mut trigger = SessionTrigger::new(slot, date());
    trigger.areas = Some(areas.iter().map(|a| a.to_string()).collect());
    trigger
}

async fn run_session(
    config: &Config,
    trigger: &SessionTrigger,
    sink: &mut MemorySink,
) -> quiet_harvest::SessionSummary {
    let mut source = PagedAreaSource::from_config(config).unwrap();
    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    scheduler.run(trigger, &mut source, sink).await.unwrap()
}

#[tokio::test]
async fn test_max_properties_caps_item_fetches() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/big/list"))
        .respond_with(html("<ul><li>listing</li></ul>"))
        .expect(5)
        .mount(&server)
        .await;

    let tuning = Tuning {
        max_properties: 5,
        ..Tuning::default()
    };
    let config = create_test_config(&server.uri(), dir.path(), &tuning);
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["big"]), &mut sink).await;

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::MaxItems));
    assert_eq!(summary.items_processed, 5);
    assert_eq!(summary.records_stored, 5);
    assert_eq!(sink.records.len(), 5);
    assert!(sink.finished);
    assert_eq!(requests_to(&server, "/area/big").await, 5);
}

#[tokio::test]
async fn test_second_invocation_is_skipped_without_fetching() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/small/list"))
        .respond_with(html("<ul><li>listing</li></ul>"))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());

    // Pre-plan the day so the first run starts from a scheduled record
    {
        let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
        let storage = scheduler.storage();
        let mut storage = storage.lock().unwrap();
        storage.schedule_day(date(), &scheduler.plan().names()).unwrap();
        let record = storage.get_slot_session(date(), "morning-1").unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Scheduled);
    }

    let mut first_sink = MemorySink::new();
    let first = run_session(&config, &trigger("morning-1", &["small"]), &mut first_sink).await;
    assert_eq!(first.status, SessionStatus::Completed);
    assert_eq!(first.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(first.items_processed, 2);

    let requests_after_first = server.received_requests().await.unwrap().len();

    let mut second_sink = MemorySink::new();
    let second = run_session(&config, &trigger("morning-1", &["small"]), &mut second_sink).await;
    assert_eq!(second.status, SessionStatus::SkippedDuplicate);
    assert_eq!(second.items_processed, 0);
    assert!(second_sink.records.is_empty());
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        requests_after_first
    );

    // The stored record still belongs to the first run
    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    let storage = scheduler.storage();
    let storage = storage.lock().unwrap();
    let record = storage.get_slot_session(date(), "morning-1").unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(record.session_id.as_deref(), Some(first.session_id.as_str()));
    assert_eq!(record.items_processed, 2);
    assert_eq!(record.assigned_areas, vec!["small".to_string()]);
    assert_eq!(record.config_hash.as_deref(), Some("test-hash"));
    assert!(record.started_at.is_some() && record.ended_at.is_some());
}

#[tokio::test]
async fn test_consecutive_timeouts_open_the_circuit() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/big/list"))
        .respond_with(html("<ul></ul>").set_delay(Duration::from_millis(1_500)))
        .mount(&server)
        .await;

    let tuning = Tuning {
        fatal_initial_failures: 0,
        ..Tuning::default()
    };
    let config = create_test_config(&server.uri(), dir.path(), &tuning);
    let mut sink = MemorySink::new();

    let mut source = PagedAreaSource::from_config(&config).unwrap();
    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    let summary = scheduler
        .run(&trigger("morning-1", &["big"]), &mut source, &mut sink)
        .await
        .unwrap();

    // First item: three timed-out attempts. Second item: two more open the
    // breaker and its third attempt is refused without touching the network.
    // Both items failed on the network, so both count as errors.
    assert_eq!(requests_to(&server, "/area/big").await, 5);
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::CircuitOpen));
    assert_eq!(summary.error_count, 2);
    assert_eq!(summary.items_processed, 0);

    let storage = scheduler.storage();
    let storage = storage.lock().unwrap();
    let breaker = storage.load_breaker(scheduler.host()).unwrap().unwrap();
    assert_eq!(breaker.state, BreakerState::Open);
    assert_eq!(breaker.failure_count, 5);
}

#[tokio::test]
async fn test_open_circuit_blocks_next_session() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(html("<html></html>"))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    {
        let storage = scheduler.storage();
        let mut storage = storage.lock().unwrap();
        storage
            .save_breaker(
                scheduler.host(),
                &quiet_harvest::state::BreakerSnapshot {
                    state: BreakerState::Open,
                    failure_count: 5,
                    last_failure_at: Some(chrono::Utc::now()),
                },
            )
            .unwrap();
    }

    let mut source = PagedAreaSource::from_config(&config).unwrap();
    let mut sink = MemorySink::new();
    let summary = scheduler
        .run(&trigger("noon-1", &["small"]), &mut source, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::CircuitOpen));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sustained_high_risk_ends_session_early() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/big/list"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tuning = Tuning {
        fatal_initial_failures: 0,
        failure_threshold: 100,
        ..Tuning::default()
    };
    let config = create_test_config(&server.uri(), dir.path(), &tuning);
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["big"]), &mut sink).await;

    // High from the second item on; the grace window tolerates three checks
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::RiskHigh));
    assert_eq!(summary.error_count, 5);
    assert_eq!(requests_to(&server, "/area/big").await, 5);
    assert_eq!(summary.final_risk, Some(quiet_harvest::RiskLevel::High));
}

#[tokio::test]
async fn test_sustained_high_risk_throttles_instead_of_stopping() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/big/list"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tuning = Tuning {
        max_properties: 8,
        fatal_initial_failures: 0,
        failure_threshold: 100,
        high_risk_action: "throttle",
    };
    let config = create_test_config(&server.uri(), dir.path(), &tuning);
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["big"]), &mut sink).await;

    // Past the grace window the session slows down but keeps going
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::MaxItems));
    assert_eq!(summary.error_count, 8);
    assert_eq!(requests_to(&server, "/area/big").await, 8);
    assert_eq!(summary.final_risk, Some(quiet_harvest::RiskLevel::High));
}

#[tokio::test]
async fn test_fixed_session_id_runs_on_consecutive_days() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/small/list"))
        .respond_with(html("<ul><li>listing</li></ul>"))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let next_day = date().succ_opt().unwrap();

    for day in [date(), next_day] {
        let mut t = trigger("morning-1", &["small"]);
        t.date = day;
        t.session_id = Some("morning-1".to_string());

        let mut sink = MemorySink::new();
        let summary = run_session(&config, &t, &mut sink).await;
        assert_eq!(summary.status, SessionStatus::Completed, "on {}", day);
        assert_eq!(summary.items_processed, 2);
    }

    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    let storage = scheduler.storage();
    let storage = storage.lock().unwrap();
    for day in [date(), next_day] {
        let record = storage.get_session(day, "morning-1").unwrap().unwrap();
        assert_eq!(record.date_key, day);
        assert_eq!(record.status, SessionStatus::Completed);
    }
}

#[tokio::test]
async fn test_empty_pages_count_as_processed_not_errors() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/small/list"))
        .respond_with(html(""))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["small"]), &mut sink).await;

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.items_processed, 2);
    assert_eq!(summary.records_stored, 0);
    assert_eq!(summary.error_count, 0);
    assert!(sink.records.is_empty());
}

#[tokio::test]
async fn test_first_fetch_failure_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/big/list"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["big"]), &mut sink).await;

    assert_eq!(summary.status, SessionStatus::Failed);
    assert_eq!(summary.stop_reason, None);
    assert_eq!(summary.error_count, 1);
    assert!(summary.error.as_deref().unwrap_or("").contains("HTTP 500"));
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn test_entry_point_failure_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["small"]), &mut sink).await;

    assert_eq!(summary.status, SessionStatus::Failed);
    assert_eq!(requests_to(&server, "/area").await, 0);
}

#[tokio::test]
async fn test_later_failures_are_counted_and_skipped() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    // First page succeeds once, every later request fails
    Mock::given(method("GET"))
        .and(path("/area/small/list"))
        .respond_with(html("<ul><li>listing</li></ul>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/area/small/list"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let mut sink = MemorySink::new();

    let summary = run_session(&config, &trigger("morning-1", &["small"]), &mut sink).await;

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(summary.items_processed, 1);
    assert_eq!(summary.error_count, 1);
}

#[tokio::test]
async fn test_spent_budget_completes_without_items() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let mut sink = MemorySink::new();
    let mut t = trigger("morning-1", &["big"]);
    t.max_runtime = Some(Duration::ZERO);

    let summary = run_session(&config, &t, &mut sink).await;

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.stop_reason, Some(StopReason::Deadline));
    assert_eq!(requests_to(&server, "/area").await, 0);
}

#[tokio::test]
async fn test_day_assignment_is_used_without_override() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(html("<ul><li>listing</li></ul>"))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    let expected = scheduler.preview_assignment(date());

    let mut source = PagedAreaSource::from_config(&config).unwrap();
    let mut sink = MemorySink::new();
    let summary = scheduler
        .run(&SessionTrigger::new("noon-1", date()), &mut source, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.assigned_areas, expected["noon-1"]);
    let stored = scheduler.assignment_for(date(), "noon-1").unwrap();
    assert_eq!(stored, summary.assigned_areas);
}

#[tokio::test]
async fn test_records_and_summary_files() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_home(&server).await;
    Mock::given(method("GET"))
        .and(path("/area/small/list"))
        .respond_with(html("<ul><li>listing</li></ul>"))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &Tuning::default());
    let records_dir = Path::new(&config.output.records_dir).to_path_buf();

    let mut t = trigger("morning-1", &["small"]);
    t.session_id = Some("morning-1-20250115T074000".to_string());

    let mut source = PagedAreaSource::from_config(&config).unwrap();
    let mut sink = JsonlSink::new(&records_dir, date(), "morning-1-20250115T074000");
    let scheduler = SessionScheduler::new(config.clone(), "test-hash").unwrap();
    let summary = scheduler.run(&t, &mut source, &mut sink).await.unwrap();
    let summary_path = write_summary(&records_dir, &summary).unwrap();

    let day_dir = records_dir.join("2025-01-15");
    let lines = std::fs::read_to_string(day_dir.join("morning-1-20250115T074000.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 2);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(written["session_id"], "morning-1-20250115T074000");
    assert_eq!(written["status"], "completed");
    assert_eq!(written["items_processed"], 2);
}

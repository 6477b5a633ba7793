//! End-to-end scheduler scenarios.
//!
//! Exercises the application wiring:
//! - Holiday-adjusted arming of a weekly strategy
//! - Manual runs surviving a restart through the signal journal
//! - Hot reload of the scheduling document
//! - Signal cancellation through the control API

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use cadence_bot::{AppConfig, Application};
use cadence_core::{JobKey, JobKind, ManualClock, SignalId, StrategyId};
use cadence_engine::{Capabilities, MockExecutor, MockGenerator};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const SCHEDULE: &str = r#"
timezone = "Asia/Kolkata"

[trading_calendar]
weekend_days = [5, 6]
holidays = ["2025-01-26", "2025-01-27"]

[execution_settings]
max_retries = 3
retry_delay_minutes = 5

[strategies.rotation_etf]
enabled = true
generator = "rotation_etf"
signal_table = "etf_signal"
strategy_table = "etf_saved_strategy"

[strategies.rotation_etf.signal_generation]
frequency = "weekly"
day_of_week = "monday"
time = "06:00"
skip_holidays = true

[strategies.rotation_etf.signal_execution]
frequency = "weekly"
execution_rule = "first_trading_day_of_week"
time = "10:00"
skip_holidays = true
"#;

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

struct Fixture {
    dir: TempDir,
    generator: Arc<MockGenerator>,
    executor: Arc<MockExecutor>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schedule.toml"), SCHEDULE).unwrap();
        Self {
            dir,
            generator: Arc::new(MockGenerator::new(vec![
                json!({"symbol": "NIFTYBEES", "weight": 0.6}),
                json!({"symbol": "GOLDBEES", "weight": 0.4}),
            ])),
            executor: Arc::new(MockExecutor::new()),
        }
    }

    fn schedule_path(&self) -> PathBuf {
        self.dir.path().join("schedule.toml")
    }

    fn app(&self) -> Application {
        let config = AppConfig {
            data_dir: self.dir.path().join("signals"),
            ..AppConfig::default()
        };
        let capabilities = Capabilities::new()
            .with_generator("rotation_etf", self.generator.clone())
            .with_executor("webhook", self.executor.clone());
        let clock = Arc::new(ManualClock::new(utc(2025, 1, 26, 0, 0)));
        Application::with_capabilities(config, self.schedule_path(), capabilities, clock).unwrap()
    }
}

/// Rewrite `path` and push its mtime forward so the change is observable.
fn rewrite(path: &Path, content: &str, bump_secs: u64) {
    std::fs::write(path, content).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(bump_secs))
        .unwrap();
}

#[tokio::test]
async fn test_holiday_monday_moves_jobs_to_tuesday() {
    let fixture = Fixture::new();
    let app = fixture.app();
    app.start();

    let jobs = app.armed_jobs();
    assert_eq!(
        jobs,
        vec![
            // 06:00 and 10:00 IST on Tuesday 2025-01-28
            (JobKey::generation("rotation_etf".into()), utc(2025, 1, 28, 0, 30)),
            (JobKey::execution("rotation_etf".into()), utc(2025, 1, 28, 4, 30)),
        ]
    );

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_runs_survive_restart() {
    let fixture = Fixture::new();
    let id = StrategyId::from("rotation_etf");

    let first = fixture.app();
    let reports = first.run_manual(&[JobKind::Generation]).await.unwrap();
    assert_eq!(*reports[0].generated.as_ref().unwrap().as_ref().unwrap(), 2);
    assert!(reports[0].execution.is_none());
    assert!(fixture.dir.path().join("signals/etf_signal.jsonl").exists());
    drop(first);

    // A new process sees the pending rows and executes them
    let second = fixture.app();
    assert_eq!(second.engine().tracker().statistics(&id).pending, 2);
    let reports = second.run_manual(&[JobKind::Execution]).await.unwrap();
    let summary = reports[0].execution.as_ref().unwrap().as_ref().unwrap();
    assert_eq!(summary.executed, 2);
    assert_eq!(fixture.executor.executed().len(), 2);
    assert_eq!(fixture.generator.calls().len(), 1);
    drop(second);

    let third = fixture.app();
    let stats = third.engine().tracker().statistics(&id);
    assert_eq!((stats.total, stats.executed, stats.pending), (2, 2, 0));
}

#[tokio::test]
async fn test_hot_reload_applies_and_rejects() {
    let fixture = Fixture::new();
    let mut app = fixture.app();
    app.start();
    assert_eq!(app.armed_jobs().len(), 2);
    assert!(!app.reload_if_changed());

    // Disabling the strategy cancels both jobs
    rewrite(
        &fixture.schedule_path(),
        &SCHEDULE.replacen("enabled = true", "enabled = false", 1),
        60,
    );
    assert!(app.reload_if_changed());
    assert!(app.armed_jobs().is_empty());
    assert_eq!(app.registry().snapshot().version, 2);

    // An invalid document keeps the previous configuration
    rewrite(
        &fixture.schedule_path(),
        &SCHEDULE.replace("\"weekly\"", "\"hourly\""),
        120,
    );
    assert!(!app.reload_if_changed());
    assert_eq!(app.registry().snapshot().version, 2);

    // Re-enabling arms the jobs again
    rewrite(&fixture.schedule_path(), SCHEDULE, 180);
    assert!(app.reload_if_changed());
    assert_eq!(app.armed_jobs().len(), 2);

    app.shutdown().await.unwrap();
}

async fn post(app: &Application, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.api_router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_api_cancel_survives_restart() {
    let fixture = Fixture::new();
    let id = StrategyId::from("rotation_etf");

    let first = fixture.app();
    let (status, body) = post(&first, "/signals/generate/rotation_etf").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["generated"], 2);

    let target = first.engine().tracker().fetch_pending(&id)[0].id;
    let (status, body) = post(&first, &format!("/signals/cancel/{target}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);
    first.shutdown().await.unwrap();
    drop(first);

    // Only the remaining pending signal is executed after a restart
    let second = fixture.app();
    let stats = second.engine().tracker().statistics(&id);
    assert_eq!((stats.pending, stats.cancelled), (1, 1));
    let reports = second.run_manual(&[JobKind::Execution]).await.unwrap();
    let summary = reports[0].execution.as_ref().unwrap().as_ref().unwrap();
    assert_eq!(summary.executed, 1);
    assert!(fixture.executor.executed().iter().all(|s| s.id != target));

    // Cancelling an executed signal is refused
    let executed: SignalId = fixture.executor.executed()[0].id;
    assert!(second.cancel_signal(executed).is_err());
    assert!(!second.cancel_signal(target).unwrap());
}

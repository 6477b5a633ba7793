//! HTTP server implementation using axum.
//!
//! Routes:
//! - `GET  /health`, `GET /metrics`, `GET /jobs`
//! - `GET  /signals/generated/all`, `GET /signals/generated/{strategy}`
//! - `POST /signals/generate/all`, `POST /signals/generate/{strategy}`
//! - `POST /signals/execute/all`, `POST /signals/execute/{strategy}`
//! - `POST /signals/cancel/{id}`
//!
//! Manual runs share the per-job locks with scheduled fires.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use cadence_core::{JobKind, SignalId, StrategyId};
use cadence_engine::SchedulerEngine;
use cadence_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::types::{
    CancelResponse, HealthResponse, JobView, ManualOutcome, ManualResponse, SignalsResponse,
    StrategySignals,
};

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct ApiState {
    engine: Arc<SchedulerEngine>,
    started_at: Instant,
}

impl ApiState {
    #[must_use]
    pub fn new(engine: Arc<SchedulerEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }
}

/// Create the axum router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/jobs", get(list_jobs))
        .route("/signals/generated/all", get(all_generated))
        .route("/signals/generated/{strategy}", get(strategy_generated))
        .route("/signals/generate/all", post(generate_all))
        .route("/signals/generate/{strategy}", post(generate_strategy))
        .route("/signals/execute/all", post(execute_all))
        .route("/signals/execute/{strategy}", post(execute_strategy))
        .route("/signals/cancel/{id}", post(cancel_signal))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "cadence",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        config_version: state.engine.snapshot().version,
        armed_jobs: state.engine.armed_jobs().len(),
    })
}

async fn metrics() -> ApiResult<String> {
    Metrics::render().map_err(|e| ApiError::Metrics(e.to_string()))
}

async fn list_jobs(State(state): State<ApiState>) -> Json<Vec<JobView>> {
    Json(
        state
            .engine
            .armed_jobs()
            .into_iter()
            .map(JobView::from)
            .collect(),
    )
}

fn strategy_signals(engine: &SchedulerEngine, strategy: StrategyId) -> StrategySignals {
    let tracker = engine.tracker();
    StrategySignals {
        stats: tracker.statistics(&strategy),
        signals: tracker.fetch_pending(&strategy),
        strategy,
    }
}

async fn all_generated(State(state): State<ApiState>) -> Json<SignalsResponse> {
    let snapshot = state.engine.snapshot();
    let strategies: Vec<StrategySignals> = snapshot
        .document
        .strategies
        .iter()
        .map(|s| strategy_signals(&state.engine, s.id.clone()))
        .collect();

    Json(SignalsResponse {
        success: true,
        count: strategies.iter().map(|s| s.signals.len()).sum(),
        strategies,
    })
}

async fn strategy_generated(
    State(state): State<ApiState>,
    Path(strategy): Path<String>,
) -> ApiResult<Json<SignalsResponse>> {
    let strategy = StrategyId::from(strategy.as_str());
    if state.engine.snapshot().strategy(&strategy).is_none() {
        return Err(ApiError::UnknownStrategy(strategy));
    }

    let signals = strategy_signals(&state.engine, strategy);
    Ok(Json(SignalsResponse {
        success: true,
        count: signals.signals.len(),
        strategies: vec![signals],
    }))
}

/// 200 when every job succeeded, 500 otherwise. The body carries the
/// per-strategy detail either way.
fn manual_response(results: Vec<ManualOutcome>) -> Response {
    let body = ManualResponse::new(results);
    let status = if body.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(body)).into_response()
}

async fn run_all(state: &ApiState, kinds: &[JobKind]) -> Response {
    info!(?kinds, "Manual run requested for all strategies");
    let reports = state.engine.run_manual(kinds).await;
    manual_response(reports.into_iter().map(ManualOutcome::from).collect())
}

async fn run_one(state: &ApiState, strategy: String, kinds: &[JobKind]) -> ApiResult<Response> {
    let strategy = StrategyId::from(strategy.as_str());
    info!(strategy = %strategy, ?kinds, "Manual run requested");
    let report = state.engine.run_manual_for(&strategy, kinds).await?;
    Ok(manual_response(vec![ManualOutcome::from(report)]))
}

async fn generate_all(State(state): State<ApiState>) -> Response {
    run_all(&state, &[JobKind::Generation]).await
}

async fn generate_strategy(
    State(state): State<ApiState>,
    Path(strategy): Path<String>,
) -> ApiResult<Response> {
    run_one(&state, strategy, &[JobKind::Generation]).await
}

async fn execute_all(State(state): State<ApiState>) -> Response {
    run_all(&state, &[JobKind::Execution]).await
}

async fn execute_strategy(
    State(state): State<ApiState>,
    Path(strategy): Path<String>,
) -> ApiResult<Response> {
    run_one(&state, strategy, &[JobKind::Execution]).await
}

async fn cancel_signal(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<CancelResponse>> {
    let signal_id = SignalId(id);
    let cancelled = state.engine.tracker().cancel(signal_id)?;
    Ok(Json(CancelResponse {
        success: true,
        signal_id,
        cancelled,
    }))
}

/// Run the control API until `cancel` fires.
pub async fn run_server(
    engine: Arc<SchedulerEngine>,
    config: ApiConfig,
    cancel: CancellationToken,
) -> ApiResult<()> {
    let app = create_router(ApiState::new(engine));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ApiError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "Starting control API");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    warn!("Control API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use cadence_core::ManualClock;
    use cadence_engine::{Capabilities, MockExecutor, MockGenerator};
    use cadence_lifecycle::{RetryPolicy, SignalLifecycleTracker};
    use cadence_registry::{ConfigDocument, DocumentFormat, RegistrySnapshot};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const DOC: &str = r#"
timezone = "Asia/Kolkata"

[trading_calendar]
weekend_days = [5, 6]

[strategies.rotation_etf]
enabled = true
generator = "rotation_etf"
signal_table = "etf_signal"

[strategies.rotation_etf.signal_generation]
frequency = "weekly"
day_of_week = "monday"
time = "06:00"

[strategies.rotation_etf.signal_execution]
execution_rule = "first_trading_day_of_week"
time = "10:00"

[strategies.momentum]
enabled = false
generator = "rotation_etf"
signal_table = "stock_signal"

[strategies.momentum.signal_generation]
frequency = "daily"
time = "07:00"

[strategies.momentum.signal_execution]
execution_rule = "next_trading_day"
time = "09:30"
"#;

    struct TestApi {
        router: Router,
        generator: Arc<MockGenerator>,
        executor: Arc<MockExecutor>,
    }

    fn test_api() -> TestApi {
        let generator = Arc::new(MockGenerator::new(vec![
            json!({"symbol": "NIFTYBEES"}),
            json!({"symbol": "GOLDBEES"}),
        ]));
        let executor = Arc::new(MockExecutor::new());
        let capabilities = Capabilities::new()
            .with_generator("rotation_etf", generator.clone())
            .with_executor("webhook", executor.clone());

        let snapshot = Arc::new(RegistrySnapshot {
            version: 1,
            loaded_at: Utc::now(),
            document: ConfigDocument::parse(DOC, DocumentFormat::Toml).unwrap(),
        });
        let engine = SchedulerEngine::new(
            Arc::new(SignalLifecycleTracker::new(RetryPolicy::default())),
            Arc::new(capabilities),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2025, 1, 28, 0, 30, 0).unwrap(),
            )),
            snapshot,
        );

        TestApi {
            router: create_router(ApiState::new(Arc::new(engine))),
            generator,
            executor,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let api = test_api();
        let (status, body) = send(&api.router, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["config_version"], 1);
        // Not started, nothing armed
        assert_eq!(body["armed_jobs"], 0);
    }

    #[tokio::test]
    async fn test_metrics_and_jobs() {
        let api = test_api();
        send(&api.router, Method::POST, "/signals/generate/rotation_etf").await;

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = api.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("cadence_signals_generated_total"));

        let (status, body) = send(&api.router, Method::GET, "/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_then_list() {
        let api = test_api();

        let (status, body) =
            send(&api.router, Method::POST, "/signals/generate/rotation_etf").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["results"][0]["generated"], 2);
        assert_eq!(api.generator.calls().len(), 1);

        let (status, body) =
            send(&api.router, Method::GET, "/signals/generated/rotation_etf").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["strategies"][0]["stats"]["pending"], 2);
        assert_eq!(body["strategies"][0]["signals"][0]["payload"]["symbol"], "NIFTYBEES");

        // Disabled strategies are listed with no signals
        let (_, body) = send(&api.router, Method::GET, "/signals/generated/all").await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["strategies"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_or_disabled_strategy_is_not_found() {
        let api = test_api();

        let (status, body) = send(&api.router, Method::POST, "/signals/generate/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = send(&api.router, Method::POST, "/signals/execute/momentum").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&api.router, Method::GET, "/signals/generated/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(api.generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_all() {
        let api = test_api();
        send(&api.router, Method::POST, "/signals/generate/all").await;

        let (status, body) = send(&api.router, Method::POST, "/signals/execute/all").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["execution"]["executed"], 2);
        assert_eq!(api.executor.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_generator_failure_is_server_error() {
        let api = test_api();
        api.generator.set_failing(true);

        let (status, body) = send(&api.router, Method::POST, "/signals/generate/all").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["results"][0]["errors"][0]
            .as_str()
            .unwrap()
            .contains("mock generator failure"));
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let api = test_api();
        send(&api.router, Method::POST, "/signals/generate/rotation_etf").await;
        let (_, body) = send(&api.router, Method::GET, "/signals/generated/rotation_etf").await;
        let first = body["strategies"][0]["signals"][0]["id"].as_u64().unwrap();

        let uri = format!("/signals/cancel/{first}");
        let (status, body) = send(&api.router, Method::POST, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);

        // Second cancel is a no-op
        let (status, body) = send(&api.router, Method::POST, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], false);

        // The cancelled signal is skipped by execution
        let (_, body) = send(&api.router, Method::POST, "/signals/execute/rotation_etf").await;
        assert_eq!(body["results"][0]["execution"]["executed"], 1);

        let (_, body) = send(&api.router, Method::GET, "/signals/generated/rotation_etf").await;
        assert_eq!(body["strategies"][0]["stats"]["cancelled"], 1);
        assert_eq!(body["strategies"][0]["stats"]["executed"], 1);

        let (status, _) = send(&api.router, Method::POST, "/signals/cancel/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_executed_signal_conflicts() {
        let api = test_api();
        send(&api.router, Method::POST, "/signals/generate/rotation_etf").await;
        send(&api.router, Method::POST, "/signals/execute/rotation_etf").await;
        let id = api.executor.executed()[0].id;

        let (status, body) =
            send(&api.router, Method::POST, &format!("/signals/cancel/{id}")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }
}

//! Main application orchestration.
//!
//! Start-up order:
//! 1. Parse the scheduling document and build capabilities from it
//! 2. Load the registry against those capabilities
//! 3. Replay the signal journal into a fresh lifecycle tracker
//! 4. Hand everything to the scheduler engine
//! 5. In automated mode, serve the control API if enabled

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cadence_api::{create_router, run_server, ApiState};
use cadence_core::{Clock, JobKey, JobKind, SignalId, SystemClock};
use cadence_engine::{Capabilities, ManualReport, SchedulerEngine};
use cadence_lifecycle::{RetryPolicy, SignalLifecycleTracker};
use cadence_persistence::SignalJournal;
use cadence_registry::{ConfigDocument, StrategyRegistry};
use cadence_telemetry::Metrics;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

// ============================================================================
// Config watcher
// ============================================================================

/// Detects changes to a file by polling its modification time.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Start watching `path` from its current state.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once per observed change.
    pub fn poll(&mut self) -> bool {
        let current = modified(&self.path);
        if current.is_some() && current != self.last_modified {
            self.last_modified = current;
            return true;
        }
        false
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

// ============================================================================
// Application
// ============================================================================

/// Main application.
pub struct Application {
    config: AppConfig,
    registry: Arc<StrategyRegistry>,
    journal: Arc<SignalJournal>,
    engine: Arc<SchedulerEngine>,
    watcher: ConfigWatcher,
}

impl Application {
    /// Create an application whose capabilities come from `config`.
    pub fn new(config: AppConfig, schedule_path: impl Into<PathBuf>) -> AppResult<Self> {
        let schedule_path = schedule_path.into();
        let document = ConfigDocument::from_path(&schedule_path)?;
        let capabilities = config.build_capabilities(&document.settings)?;
        info!(
            generators = ?capabilities.generator_names(),
            executors = ?capabilities.executor_names(),
            "Capabilities registered"
        );
        Self::assemble(config, schedule_path, document, capabilities, Arc::new(SystemClock))
    }

    /// Create an application with explicit capabilities and clock.
    pub fn with_capabilities(
        config: AppConfig,
        schedule_path: impl Into<PathBuf>,
        capabilities: Capabilities,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let schedule_path = schedule_path.into();
        let document = ConfigDocument::from_path(&schedule_path)?;
        Self::assemble(config, schedule_path, document, capabilities, clock)
    }

    fn assemble(
        config: AppConfig,
        schedule_path: PathBuf,
        document: ConfigDocument,
        capabilities: Capabilities,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let capabilities = Arc::new(capabilities);
        let registry = Arc::new(StrategyRegistry::load(document, capabilities.clone())?);

        let records = SignalJournal::replay(&config.data_dir)?;
        let journal = Arc::new(SignalJournal::open(&config.data_dir)?);
        let tracker = Arc::new(SignalLifecycleTracker::with_journal(
            RetryPolicy::default(),
            journal.clone(),
        ));
        let restored = tracker.restore(records);
        if restored > 0 {
            info!(restored, "Signals restored from journal");
        }

        let engine = Arc::new(SchedulerEngine::new(
            tracker,
            capabilities,
            clock,
            registry.snapshot(),
        ));

        Ok(Self {
            config,
            registry,
            journal,
            engine,
            watcher: ConfigWatcher::new(schedule_path),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &SchedulerEngine {
        &self.engine
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    /// Arm every enabled strategy.
    pub fn start(&self) {
        self.engine.start();
    }

    #[must_use]
    pub fn armed_jobs(&self) -> Vec<(JobKey, DateTime<Utc>)> {
        self.engine.armed_jobs()
    }

    /// Reload the scheduling document if it changed since the last check.
    ///
    /// Returns whether a new configuration was applied. A rejected document
    /// leaves the previous configuration running.
    pub fn reload_if_changed(&mut self) -> bool {
        if !self.watcher.poll() {
            return false;
        }

        info!(path = %self.watcher.path().display(), "Scheduling document changed, reloading");
        match self.registry.reload_path(self.watcher.path()) {
            Ok(diff) => {
                Metrics::config_reload("ok");
                if diff.is_empty() {
                    debug!("Reload produced no job changes");
                }
                self.engine.apply_diff(&diff, self.registry.snapshot());
                true
            }
            Err(e) => {
                Metrics::config_reload("error");
                error!(
                    path = %self.watcher.path().display(),
                    error = %e,
                    "Reload failed, keeping previous configuration"
                );
                false
            }
        }
    }

    /// Control API router over this application's engine.
    #[must_use]
    pub fn api_router(&self) -> axum::Router {
        create_router(ApiState::new(self.engine.clone()))
    }

    /// Cancel a pending signal and flush the journal.
    ///
    /// Returns false if it was already cancelled.
    pub fn cancel_signal(&self, id: SignalId) -> AppResult<bool> {
        let cancelled = self.engine.tracker().cancel(id)?;
        self.journal.close()?;
        Ok(cancelled)
    }

    /// Run the requested jobs once and flush the journal.
    pub async fn run_manual(&self, kinds: &[JobKind]) -> AppResult<Vec<ManualReport>> {
        info!(?kinds, "Running manual jobs");
        let reports = self.engine.run_manual(kinds).await;
        self.journal.close()?;
        Ok(reports)
    }

    /// Run until Ctrl-C, hot-reloading the scheduling document.
    pub async fn run_automated(mut self) -> AppResult<()> {
        self.start();
        for (key, at) in self.armed_jobs() {
            info!(job = %key, fire_at = %at, "Job armed");
        }

        let api_cancel = CancellationToken::new();
        let api_task = self.config.api.enabled.then(|| {
            let engine = self.engine.clone();
            let config = self.config.api.clone();
            let cancel = api_cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = run_server(engine, config, cancel).await {
                    error!(error = %e, "Control API failed");
                }
            })
        });

        let reload_enabled = self.config.reload_interval_secs > 0;
        let mut reload_tick = tokio::time::interval(Duration::from_secs(
            self.config.reload_interval_secs.max(1),
        ));
        reload_tick.tick().await;
        if !reload_enabled {
            warn!("Hot reload disabled");
        }

        loop {
            tokio::select! {
                _ = reload_tick.tick(), if reload_enabled => {
                    self.reload_if_changed();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        api_cancel.cancel();
        if let Some(task) = api_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Control API task ended abnormally");
            }
        }
        self.shutdown().await
    }

    /// Stop the engine, wait for in-flight fires, and flush the journal.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.engine.shutdown().await;
        self.journal.close()?;
        Ok(())
    }
}

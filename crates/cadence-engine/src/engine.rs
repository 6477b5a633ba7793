//! Scheduler engine.
//!
//! Each enabled strategy owns two jobs, generation and execution. A job moves
//! through `Idle → Armed(at) → Firing → Armed(at')` until its strategy is
//! removed, which drops the job slot.
//!
//! A single dispatcher task pops due entries from the [`FireQueue`] and
//! spawns one task per fire. The fire task holds the job's async mutex while
//! it invokes the capability, reports to the lifecycle tracker and re-arms,
//! so fires of the same job never overlap while different jobs run freely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use cadence_core::{Clock, JobKey, JobKind, StrategyId};
use cadence_lifecycle::{FailureOutcome, RetryPolicy, SignalLifecycleTracker};
use cadence_registry::{RegistryDiff, RegistrySnapshot, StrategyConfig};
use cadence_resolver::{ResolveResult, ScheduleResolver};
use cadence_telemetry::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::capability::{Capabilities, GenerationContext};
use crate::error::{EngineError, EngineResult};
use crate::queue::{FireEntry, FireQueue, FireReason};

/// Upper bound on one dispatcher sleep, so wall-clock jumps are noticed.
const MAX_IDLE_WAIT: StdDuration = StdDuration::from_secs(60);

// ============================================================================
// Reports
// ============================================================================

/// Outcome of one execution pass over a strategy's due signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub attempted: usize,
    pub executed: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
    pub purged: usize,
}

/// Result of a manual run for one strategy.
#[derive(Debug)]
pub struct ManualReport {
    pub strategy: StrategyId,
    /// Signals recorded, if generation was requested.
    pub generated: Option<EngineResult<usize>>,
    pub execution: Option<EngineResult<ExecutionSummary>>,
}

// ============================================================================
// Job state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Armed(DateTime<Utc>),
    Firing,
    Idle,
}

#[derive(Debug)]
struct JobSlot {
    /// Identifies this arming; entries from earlier armings are stale.
    epoch: u64,
    state: JobState,
    /// Earliest queued retry, execution jobs only.
    retry_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SchedulerState {
    queue: FireQueue,
    jobs: HashMap<JobKey, JobSlot>,
    /// Outlive job slots so a removed job's in-flight fire still serializes
    /// with a re-added job.
    locks: HashMap<JobKey, Arc<tokio::sync::Mutex<()>>>,
    next_epoch: u64,
}

impl SchedulerState {
    fn lock_for(&mut self, key: &JobKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    fn install(&mut self, key: JobKey, fire_at: DateTime<Utc>) {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.queue
            .push(key.clone(), fire_at, epoch, FireReason::Scheduled);
        Metrics::next_fire(key.strategy.as_str(), key.kind.as_str(), fire_at);
        self.jobs.insert(
            key,
            JobSlot {
                epoch,
                state: JobState::Armed(fire_at),
                retry_at: None,
            },
        );
    }

    fn remove(&mut self, strategy: &StrategyId) -> usize {
        let mut removed = 0;
        for kind in JobKind::ALL {
            let key = JobKey::new(strategy.clone(), kind);
            if self.jobs.remove(&key).is_some() {
                Metrics::clear_next_fire(strategy.as_str(), kind.as_str());
                removed += 1;
            }
        }
        self.queue.retain(|e| &e.key.strategy != strategy);
        removed
    }

    /// Entry still belongs to the live arming of its job.
    fn is_current(&self, entry: &FireEntry) -> bool {
        match self.jobs.get(&entry.key) {
            Some(slot) if slot.epoch == entry.epoch => match entry.reason {
                FireReason::Scheduled => slot.state == JobState::Armed(entry.fire_at),
                FireReason::Retry => true,
            },
            _ => false,
        }
    }
}

struct FireTask {
    entry: FireEntry,
    config: StrategyConfig,
    lock: Arc<tokio::sync::Mutex<()>>,
}

// ============================================================================
// Engine
// ============================================================================

struct EngineInner {
    tracker: Arc<SignalLifecycleTracker>,
    capabilities: Arc<Capabilities>,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    state: Mutex<SchedulerState>,
    notify: Notify,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Timer-driven scheduler over a registry snapshot.
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
    started: AtomicBool,
}

impl SchedulerEngine {
    /// Create an engine for `snapshot`.
    ///
    /// Applies the snapshot's execution settings and table bindings right
    /// away; no job is armed until [`start`](Self::start).
    #[must_use]
    pub fn new(
        tracker: Arc<SignalLifecycleTracker>,
        capabilities: Arc<Capabilities>,
        clock: Arc<dyn Clock>,
        snapshot: Arc<RegistrySnapshot>,
    ) -> Self {
        let inner = EngineInner {
            tracker,
            capabilities,
            clock,
            snapshot: RwLock::new(snapshot.clone()),
            state: Mutex::new(SchedulerState::default()),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };
        inner.apply_settings(&snapshot);
        for strategy in &snapshot.document.strategies {
            inner
                .tracker
                .bind_table(&strategy.id, &strategy.signal_table);
        }

        Self {
            inner: Arc::new(inner),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.snapshot.read().clone()
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<SignalLifecycleTracker> {
        &self.inner.tracker
    }

    /// Arm every enabled strategy and spawn the dispatcher.
    ///
    /// Must be called inside a Tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already started");
            return;
        }

        let snapshot = self.snapshot();
        let now = self.inner.clock.now();
        for strategy in snapshot.enabled_strategies() {
            self.inner.arm_strategy(&snapshot, strategy, now);
        }

        let inner = self.inner.clone();
        self.inner.tasks.spawn(inner.dispatch_loop());
        info!(
            version = snapshot.version,
            jobs = self.armed_jobs().len(),
            "Scheduler started"
        );
    }

    /// Install a new snapshot and reprogram only the affected jobs.
    pub fn apply_diff(&self, diff: &RegistryDiff, snapshot: Arc<RegistrySnapshot>) {
        // Drop outgoing jobs before the new snapshot is visible to the dispatcher.
        {
            let mut state = self.inner.state.lock();
            for id in &diff.removed {
                let removed = state.remove(id);
                info!(strategy = %id, jobs = removed, "Strategy jobs cancelled");
            }
            for id in &diff.changed {
                state.remove(id);
            }
        }
        *self.inner.snapshot.write() = snapshot.clone();

        if diff.settings_changed {
            self.inner.apply_settings(&snapshot);
        }
        for strategy in &snapshot.document.strategies {
            self.inner
                .tracker
                .bind_table(&strategy.id, &strategy.signal_table);
        }

        if self.started.load(Ordering::SeqCst) {
            let now = self.inner.clock.now();
            for id in &diff.changed {
                if let Some(config) = snapshot.strategy(id) {
                    info!(strategy = %id, "Re-arming changed strategy");
                    self.inner.arm_strategy(&snapshot, config, now);
                }
            }
            for id in &diff.added {
                if let Some(config) = snapshot.strategy(id) {
                    info!(strategy = %id, "Arming added strategy");
                    self.inner.arm_strategy(&snapshot, config, now);
                }
            }
            self.inner.notify.notify_one();
        }

        info!(
            version = snapshot.version,
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            settings_changed = diff.settings_changed,
            "Configuration applied"
        );
    }

    /// Armed jobs with their next fire time, earliest first.
    #[must_use]
    pub fn armed_jobs(&self) -> Vec<(JobKey, DateTime<Utc>)> {
        let state = self.inner.state.lock();
        let mut jobs: Vec<(JobKey, DateTime<Utc>)> = state
            .jobs
            .iter()
            .filter_map(|(key, slot)| match slot.state {
                JobState::Armed(at) => Some((key.clone(), at)),
                _ => None,
            })
            .collect();
        jobs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        jobs
    }

    /// Run the requested jobs once for every enabled strategy, now.
    ///
    /// Strategies run in declaration order, generation before execution.
    /// Armed schedules are not touched.
    pub async fn run_manual(&self, kinds: &[JobKind]) -> Vec<ManualReport> {
        let snapshot = self.snapshot();
        let mut reports = Vec::new();
        for config in snapshot.enabled_strategies() {
            reports.push(self.run_manual_strategy(&snapshot, config, kinds).await);
        }
        reports
    }

    /// Run the requested jobs once for one enabled strategy.
    pub async fn run_manual_for(
        &self,
        id: &StrategyId,
        kinds: &[JobKind],
    ) -> EngineResult<ManualReport> {
        let snapshot = self.snapshot();
        let config = snapshot
            .strategy(id)
            .filter(|c| c.enabled)
            .ok_or_else(|| EngineError::UnknownStrategy(id.clone()))?;
        Ok(self.run_manual_strategy(&snapshot, config, kinds).await)
    }

    async fn run_manual_strategy(
        &self,
        snapshot: &RegistrySnapshot,
        config: &StrategyConfig,
        kinds: &[JobKind],
    ) -> ManualReport {
        let mut report = ManualReport {
            strategy: config.id.clone(),
            generated: None,
            execution: None,
        };

        if kinds.contains(&JobKind::Generation) {
            let key = JobKey::generation(config.id.clone());
            let lock = self.inner.state.lock().lock_for(&key);
            let _guard = lock.lock().await;
            let result = self.inner.run_generation(config, self.inner.clock.now()).await;
            self.inner.observe(&key, "manual", &result);
            report.generated = Some(result);
        }

        if kinds.contains(&JobKind::Execution) {
            let key = JobKey::execution(config.id.clone());
            let lock = self.inner.state.lock().lock_for(&key);
            let _guard = lock.lock().await;
            let result = self.inner.run_execution(snapshot, config).await;
            self.inner.observe(&key, "manual", &result);
            report.execution = Some(result);
        }

        report
    }

    /// Stop the dispatcher and wait for in-flight fires to finish.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("Scheduler stopped");
    }
}

impl EngineInner {
    fn apply_settings(&self, snapshot: &RegistrySnapshot) {
        let settings = snapshot.settings();
        self.tracker.set_policy(RetryPolicy::new(
            settings.max_retries,
            settings.retry_delay(),
        ));
        self.capabilities.apply_settings(settings);
    }

    // ========================================================================
    // Arming
    // ========================================================================

    /// Arm both jobs of a strategy, or neither.
    fn arm_strategy(&self, snapshot: &RegistrySnapshot, config: &StrategyConfig, now: DateTime<Utc>) {
        let resolver = ScheduleResolver::new(snapshot.calendar().clone());
        let resolved = resolver
            .next_generation_fire(&config.generation, now)
            .and_then(|generation| {
                resolver
                    .execution_anchor(&config.generation, &config.execution, now)
                    .map(|execution| (generation, execution))
            });

        match resolved {
            Ok((generation, execution)) => {
                let mut state = self.state.lock();
                state.install(JobKey::generation(config.id.clone()), generation);
                state.install(JobKey::execution(config.id.clone()), execution);
                drop(state);
                info!(
                    strategy = %config.id,
                    generation_at = %generation,
                    execution_at = %execution,
                    "Strategy armed"
                );
                self.queue_retry(&JobKey::execution(config.id.clone()));
            }
            Err(e) => {
                let e = e.for_strategy(&config.id);
                error!(
                    strategy = %config.id,
                    job = "generation+execution",
                    now = %now,
                    error = %e,
                    "Failed to arm strategy, jobs left unarmed"
                );
                Metrics::arm_failure(config.id.as_str(), e.reason());
            }
        }
    }

    /// Next fire of `key` after a completed fire.
    fn resolve_next(
        &self,
        snapshot: &RegistrySnapshot,
        config: &StrategyConfig,
        kind: JobKind,
        now: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        let resolver = ScheduleResolver::new(snapshot.calendar().clone());
        let next = match kind {
            JobKind::Generation => resolver.next_generation_fire(&config.generation, now),
            JobKind::Execution => {
                resolver.execution_anchor(&config.generation, &config.execution, now)
            }
        };
        next.map_err(|e| e.for_strategy(&config.id))
    }

    fn rearm(&self, entry: &FireEntry) {
        let snapshot = self.snapshot.read().clone();
        let Some(config) = snapshot.strategy(&entry.key.strategy).filter(|c| c.enabled) else {
            return;
        };
        let now = self.clock.now();
        let next = self.resolve_next(&snapshot, config, entry.key.kind, now);

        let mut state = self.state.lock();
        let Some(slot) = state.jobs.get_mut(&entry.key) else {
            debug!(job = %entry.key, "Job removed while firing, not re-arming");
            return;
        };
        if slot.epoch != entry.epoch {
            debug!(job = %entry.key, "Job re-armed while firing, dropping stale re-arm");
            return;
        }

        match next {
            Ok(at) => {
                slot.state = JobState::Armed(at);
                state
                    .queue
                    .push(entry.key.clone(), at, entry.epoch, FireReason::Scheduled);
                Metrics::next_fire(entry.key.strategy.as_str(), entry.key.kind.as_str(), at);
                debug!(job = %entry.key, fire_at = %at, "Job re-armed");
            }
            Err(e) => {
                slot.state = JobState::Idle;
                Metrics::clear_next_fire(entry.key.strategy.as_str(), entry.key.kind.as_str());
                Metrics::arm_failure(entry.key.strategy.as_str(), e.reason());
                error!(
                    strategy = %entry.key.strategy,
                    job = entry.key.kind.as_str(),
                    fired_at = %entry.fire_at,
                    error = %e,
                    "Failed to re-arm job"
                );
            }
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Queue a one-shot retry for the strategy's earliest retry instant.
    fn queue_retry(&self, key: &JobKey) {
        let Some(retry_at) = self.tracker.next_retry_at(&key.strategy) else {
            return;
        };

        let mut state = self.state.lock();
        let Some(slot) = state.jobs.get_mut(key) else {
            return;
        };
        if slot.retry_at.is_some_and(|queued| queued <= retry_at) {
            return;
        }
        slot.retry_at = Some(retry_at);
        let epoch = slot.epoch;
        state
            .queue
            .push(key.clone(), retry_at, epoch, FireReason::Retry);
        drop(state);

        debug!(job = %key, retry_at = %retry_at, "Retry queued");
        self.notify.notify_one();
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatch_loop(self: Arc<Self>) {
        debug!("Dispatcher running");
        loop {
            let now = self.clock.now();
            for task in self.take_due(now) {
                let inner = self.clone();
                self.tasks.spawn(inner.fire(task));
            }

            let wait = self
                .state
                .lock()
                .queue
                .next_fire_at()
                .map_or(MAX_IDLE_WAIT, |at| {
                    (at - now).to_std().unwrap_or(StdDuration::ZERO).min(MAX_IDLE_WAIT)
                });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("Dispatcher cancelled");
                    return;
                }
                () = self.notify.notified() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Pop due entries, discard stale ones, and mark the rest as firing.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<FireTask> {
        let snapshot = self.snapshot.read().clone();
        let mut state = self.state.lock();
        let mut tasks = Vec::new();

        for entry in state.queue.pop_due(now) {
            if !state.is_current(&entry) {
                debug!(job = %entry.key, fire_at = %entry.fire_at, "Dropping stale fire");
                continue;
            }
            let Some(config) = snapshot
                .strategy(&entry.key.strategy)
                .filter(|c| c.enabled)
                .cloned()
            else {
                debug!(job = %entry.key, "Dropping fire for disabled strategy");
                continue;
            };

            if let Some(slot) = state.jobs.get_mut(&entry.key) {
                match entry.reason {
                    FireReason::Scheduled => slot.state = JobState::Firing,
                    FireReason::Retry => {
                        if slot.retry_at == Some(entry.fire_at) {
                            slot.retry_at = None;
                        }
                    }
                }
            }
            let lock = state.lock_for(&entry.key);
            tasks.push(FireTask {
                entry,
                config,
                lock,
            });
        }

        tasks
    }

    async fn fire(self: Arc<Self>, task: FireTask) {
        let FireTask {
            entry,
            config,
            lock,
        } = task;
        let _guard = lock.lock().await;
        let label = match entry.reason {
            FireReason::Scheduled => "ok",
            FireReason::Retry => "retry",
        };

        info!(
            strategy = %entry.key.strategy,
            job = entry.key.kind.as_str(),
            fire_at = %entry.fire_at,
            reason = ?entry.reason,
            "Job firing"
        );

        match entry.key.kind {
            JobKind::Generation => {
                let result = self.run_generation(&config, entry.fire_at).await;
                self.observe(&entry.key, label, &result);
            }
            JobKind::Execution => {
                let snapshot = self.snapshot.read().clone();
                let result = self.run_execution(&snapshot, &config).await;
                self.observe(&entry.key, label, &result);
            }
        }

        if entry.reason == FireReason::Scheduled {
            self.rearm(&entry);
        }
        if entry.key.kind == JobKind::Execution {
            self.queue_retry(&entry.key);
        }
    }

    /// Log and count a fire outcome. Errors never stop the job.
    fn observe<T: std::fmt::Debug>(&self, key: &JobKey, label: &str, result: &EngineResult<T>) {
        match result {
            Ok(outcome) => {
                Metrics::job_fire(key.strategy.as_str(), key.kind.as_str(), label);
                info!(strategy = %key.strategy, job = key.kind.as_str(), ?outcome, "Job completed");
            }
            Err(e) => {
                Metrics::job_fire(key.strategy.as_str(), key.kind.as_str(), "error");
                error!(
                    strategy = %key.strategy,
                    job = key.kind.as_str(),
                    error = %e,
                    "Job failed"
                );
            }
        }
    }

    // ========================================================================
    // Job bodies
    // ========================================================================

    async fn run_generation(
        &self,
        config: &StrategyConfig,
        fired_at: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let generator = self.capabilities.generator(&config.generator).ok_or_else(|| {
            EngineError::UnknownCapability {
                strategy: config.id.clone(),
                kind: JobKind::Generation,
                name: config.generator.clone(),
            }
        })?;
        let ctx = GenerationContext {
            strategy_id: config.id.clone(),
            signal_table: config.signal_table.clone(),
            strategy_table: config.strategy_table.clone(),
            fired_at,
        };

        // Own task so a panicking generator surfaces as an error
        let payloads = tokio::spawn(async move { generator.generate(ctx).await })
            .await
            .map_err(|e| EngineError::TaskAborted(e.to_string()))??;

        let ids = self
            .tracker
            .record_generated(&config.id, payloads, self.clock.now())?;
        Metrics::signals_generated(config.id.as_str(), ids.len());
        info!(strategy = %config.id, count = ids.len(), "Signals generated");
        Ok(ids.len())
    }

    async fn run_execution(
        &self,
        snapshot: &RegistrySnapshot,
        config: &StrategyConfig,
    ) -> EngineResult<ExecutionSummary> {
        let executor = self.capabilities.executor(&config.executor).ok_or_else(|| {
            EngineError::UnknownCapability {
                strategy: config.id.clone(),
                kind: JobKind::Execution,
                name: config.executor.clone(),
            }
        })?;

        let due = self.tracker.fetch_due(&config.id, self.clock.now());
        let mut summary = ExecutionSummary::default();
        if due.is_empty() {
            debug!(strategy = %config.id, "No due signals");
        }

        for signal in due {
            summary.attempted += 1;
            let id = signal.id;
            let executor = executor.clone();
            let result = match tokio::spawn(async move { executor.execute(&signal).await }).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("Executor task aborted: {e}")),
            };

            match result {
                Ok(()) => match self.tracker.mark_executed(id, self.clock.now()) {
                    Ok(true) => {
                        summary.executed += 1;
                        Metrics::signal_transition(config.id.as_str(), "executed");
                    }
                    Ok(false) => {}
                    Err(e) => warn!(strategy = %config.id, signal_id = %id, error = %e, "Failed to record execution"),
                },
                Err(cause) => match self.tracker.mark_failed(id, &cause, self.clock.now()) {
                    Ok(FailureOutcome::RetryScheduled { retry_count, retry_at }) => {
                        summary.retry_scheduled += 1;
                        Metrics::signal_transition(config.id.as_str(), "retry");
                        warn!(
                            strategy = %config.id,
                            signal_id = %id,
                            retry_count,
                            retry_at = %retry_at,
                            error = %cause,
                            "Signal execution failed, retry scheduled"
                        );
                    }
                    Ok(FailureOutcome::Exhausted { retry_count }) => {
                        summary.failed += 1;
                        Metrics::signal_transition(config.id.as_str(), "failed");
                        error!(
                            strategy = %config.id,
                            signal_id = %id,
                            retry_count,
                            error = %cause,
                            "Signal execution failed permanently"
                        );
                    }
                    Ok(FailureOutcome::AlreadyTerminal) => {}
                    Err(e) => warn!(strategy = %config.id, signal_id = %id, error = %e, "Failed to record failure"),
                },
            }
        }

        if snapshot.settings().cleanup_executed_signals {
            summary.purged = self.tracker.purge_executed(&config.id)?;
        }

        Ok(summary)
    }
}

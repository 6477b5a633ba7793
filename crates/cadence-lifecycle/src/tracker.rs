//! Signal lifecycle tracker.
//!
//! Signals live in a `DashMap` of per-signal mutexes. A mutation locks only
//! the signal it touches, so operations on different ids never wait on each
//! other; operations on the same id serialize on its mutex and re-check the
//! current status before changing it.
//!
//! With a journal attached, every accepted mutation is written to the
//! journal before it becomes visible. A failed write leaves the signal as it
//! was.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cadence_core::{ExecutionStatus, Signal, SignalId, StrategyId};
use cadence_persistence::{SignalJournal, SignalRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::policy::{FailureOutcome, RetryPolicy};

/// Per-strategy signal counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalStats {
    pub total: usize,
    pub pending: usize,
    pub executed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Tracks signals through their execution-status lifecycle.
pub struct SignalLifecycleTracker {
    signals: DashMap<SignalId, Arc<Mutex<Signal>>>,
    /// Signal ids per strategy, in creation order.
    by_strategy: DashMap<StrategyId, Vec<SignalId>>,
    /// Signal table per strategy (journal file name).
    tables: DashMap<StrategyId, String>,
    next_id: AtomicU64,
    policy: RwLock<RetryPolicy>,
    journal: Option<Arc<SignalJournal>>,
}

impl SignalLifecycleTracker {
    /// In-memory tracker.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            signals: DashMap::new(),
            by_strategy: DashMap::new(),
            tables: DashMap::new(),
            next_id: AtomicU64::new(1),
            policy: RwLock::new(policy),
            journal: None,
        }
    }

    /// Tracker that writes through to `journal`.
    #[must_use]
    pub fn with_journal(policy: RetryPolicy, journal: Arc<SignalJournal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(policy)
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        *self.policy.read()
    }

    /// Replace the retry policy. Applies to subsequent failures only.
    pub fn set_policy(&self, policy: RetryPolicy) {
        let mut current = self.policy.write();
        if *current != policy {
            info!(
                max_retries = policy.max_retries,
                retry_delay_secs = policy.retry_delay.num_seconds(),
                "Retry policy updated"
            );
            *current = policy;
        }
    }

    /// Record which signal table a strategy writes to.
    pub fn bind_table(&self, strategy: &StrategyId, table: &str) {
        self.tables.insert(strategy.clone(), table.to_string());
    }

    fn table_for(&self, strategy: &StrategyId) -> String {
        self.tables
            .get(strategy)
            .map(|t| t.value().clone())
            .unwrap_or_else(|| strategy.to_string())
    }

    /// Rebuild state from replayed journal records.
    ///
    /// Existing signals with the same id are replaced. The id sequence
    /// continues after the highest restored id.
    pub fn restore(&self, records: Vec<SignalRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            let signal = record.signal;
            let id = signal.id;
            let strategy = signal.strategy_id.clone();

            self.tables
                .entry(strategy.clone())
                .or_insert_with(|| record.table.clone());
            self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);

            if self
                .signals
                .insert(id, Arc::new(Mutex::new(signal)))
                .is_none()
            {
                let mut ids = self.by_strategy.entry(strategy).or_default();
                if let Err(pos) = ids.binary_search(&id) {
                    ids.insert(pos, id);
                }
            }
            restored += 1;
        }
        if restored > 0 {
            info!(signals = restored, "Restored signals from journal");
        }
        restored
    }

    // ========================================================================
    // Creation and queries
    // ========================================================================

    /// Insert one generation batch as pending signals.
    ///
    /// The batch becomes visible all at once, or not at all if the journal
    /// write fails.
    pub fn record_generated(
        &self,
        strategy: &StrategyId,
        payloads: Vec<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Vec<SignalId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let first = self
            .next_id
            .fetch_add(payloads.len() as u64, Ordering::SeqCst);
        let batch: Vec<Signal> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                Signal::new_pending(SignalId(first + i as u64), strategy.clone(), now, payload)
            })
            .collect();

        if let Some(journal) = &self.journal {
            journal.append_batch(&self.table_for(strategy), &batch)?;
        }

        let ids: Vec<SignalId> = batch.iter().map(|s| s.id).collect();
        for signal in batch {
            self.signals.insert(signal.id, Arc::new(Mutex::new(signal)));
        }
        // Publishing through the index makes the batch visible in one step
        self.by_strategy
            .entry(strategy.clone())
            .or_default()
            .extend(ids.iter().copied());

        debug!(strategy = %strategy, count = ids.len(), "Recorded generated signals");
        Ok(ids)
    }

    /// Snapshot of one signal.
    #[must_use]
    pub fn get(&self, id: SignalId) -> Option<Signal> {
        self.handle(id).map(|h| h.lock().clone())
    }

    /// All pending signals of a strategy, oldest first.
    #[must_use]
    pub fn fetch_pending(&self, strategy: &StrategyId) -> Vec<Signal> {
        self.collect(strategy, Signal::is_pending)
    }

    /// Pending signals whose retry back-off has elapsed, oldest first.
    #[must_use]
    pub fn fetch_due(&self, strategy: &StrategyId, now: DateTime<Utc>) -> Vec<Signal> {
        self.collect(strategy, |s| s.is_due(now))
    }

    /// Earliest pending retry instant for a strategy, if any.
    #[must_use]
    pub fn next_retry_at(&self, strategy: &StrategyId) -> Option<DateTime<Utc>> {
        self.fetch_pending(strategy)
            .iter()
            .filter_map(|s| s.next_attempt_at)
            .min()
    }

    /// Counts by status.
    #[must_use]
    pub fn statistics(&self, strategy: &StrategyId) -> SignalStats {
        let mut stats = SignalStats::default();
        for signal in self.collect(strategy, |_| true) {
            stats.total += 1;
            match signal.execution_status {
                ExecutionStatus::Pending => stats.pending += 1,
                ExecutionStatus::Executed => stats.executed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    fn collect(&self, strategy: &StrategyId, keep: impl Fn(&Signal) -> bool) -> Vec<Signal> {
        let ids: Vec<SignalId> = self
            .by_strategy
            .get(strategy)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut signals: Vec<Signal> = ids
            .into_iter()
            .filter_map(|id| self.get(id))
            .filter(|s| keep(s))
            .collect();
        signals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        signals
    }

    fn handle(&self, id: SignalId) -> Option<Arc<Mutex<Signal>>> {
        self.signals.get(&id).map(|h| Arc::clone(h.value()))
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Journal `next`, then publish it in place of `current`.
    fn commit(&self, current: &mut Signal, next: Signal) -> LifecycleResult<()> {
        if let Some(journal) = &self.journal {
            journal.append(&self.table_for(&next.strategy_id), &next)?;
        }
        *current = next;
        Ok(())
    }

    /// pending → executed.
    ///
    /// Re-marking an executed signal is a no-op. Returns whether the status
    /// changed.
    pub fn mark_executed(&self, id: SignalId, executed_at: DateTime<Utc>) -> LifecycleResult<bool> {
        let handle = self.handle(id).ok_or(LifecycleError::SignalNotFound(id))?;
        let mut signal = handle.lock();

        match signal.execution_status {
            ExecutionStatus::Executed => Ok(false),
            ExecutionStatus::Pending => {
                let mut next = signal.clone();
                next.execution_status = ExecutionStatus::Executed;
                next.executed_at = Some(executed_at);
                next.next_attempt_at = None;
                self.commit(&mut signal, next)?;
                debug!(signal_id = %id, "Signal executed");
                Ok(true)
            }
            from => Err(LifecycleError::InvalidTransition {
                id,
                from,
                to: ExecutionStatus::Executed,
            }),
        }
    }

    /// Report a failed execution attempt.
    ///
    /// Increments `retry_count`. Below the retry budget the signal stays
    /// pending until `now + retry_delay`; at the budget it becomes `failed`.
    /// A terminal signal is left untouched.
    pub fn mark_failed(
        &self,
        id: SignalId,
        error: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<FailureOutcome> {
        let handle = self.handle(id).ok_or(LifecycleError::SignalNotFound(id))?;
        let mut signal = handle.lock();

        if signal.execution_status.is_terminal() {
            return Ok(FailureOutcome::AlreadyTerminal);
        }

        let policy = self.policy();
        let mut next = signal.clone();
        next.retry_count += 1;
        next.last_error = Some(error.to_string());

        let outcome = if policy.is_exhausted(next.retry_count) {
            next.execution_status = ExecutionStatus::Failed;
            next.next_attempt_at = None;
            FailureOutcome::Exhausted {
                retry_count: next.retry_count,
            }
        } else {
            let retry_at = policy.next_attempt(now);
            next.next_attempt_at = Some(retry_at);
            FailureOutcome::RetryScheduled {
                retry_count: next.retry_count,
                retry_at,
            }
        };

        self.commit(&mut signal, next)?;
        match outcome {
            FailureOutcome::Exhausted { retry_count } => {
                warn!(signal_id = %id, retry_count, error, "Signal failed permanently");
            }
            _ => debug!(signal_id = %id, ?outcome, error, "Signal execution failed"),
        }
        Ok(outcome)
    }

    /// pending → cancelled. Cancelling twice is a no-op.
    pub fn cancel(&self, id: SignalId) -> LifecycleResult<bool> {
        let handle = self.handle(id).ok_or(LifecycleError::SignalNotFound(id))?;
        let mut signal = handle.lock();

        match signal.execution_status {
            ExecutionStatus::Cancelled => Ok(false),
            ExecutionStatus::Pending => {
                let mut next = signal.clone();
                next.execution_status = ExecutionStatus::Cancelled;
                next.next_attempt_at = None;
                self.commit(&mut signal, next)?;
                info!(signal_id = %id, "Signal cancelled");
                Ok(true)
            }
            from => Err(LifecycleError::InvalidTransition {
                id,
                from,
                to: ExecutionStatus::Cancelled,
            }),
        }
    }

    /// Drop executed signals of a strategy. Returns how many were removed.
    pub fn purge_executed(&self, strategy: &StrategyId) -> LifecycleResult<usize> {
        let executed: Vec<Signal> =
            self.collect(strategy, |s| s.execution_status == ExecutionStatus::Executed);
        if executed.is_empty() {
            return Ok(0);
        }

        if let Some(journal) = &self.journal {
            journal.append_purged(&self.table_for(strategy), &executed)?;
        }

        if let Some(mut ids) = self.by_strategy.get_mut(strategy) {
            ids.retain(|id| !executed.iter().any(|s| s.id == *id));
        }
        for signal in &executed {
            self.signals.remove(&signal.id);
        }

        info!(strategy = %strategy, purged = executed.len(), "Purged executed signals");
        Ok(executed.len())
    }
}

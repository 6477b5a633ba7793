//! Generator and executor capabilities.
//!
//! Strategies name their generator and executor in configuration. Names are
//! resolved against a [`Capabilities`] table built at startup, which also
//! serves as the registry's `CapabilityCatalog` so unknown names fail the
//! configuration load.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cadence_core::{Signal, StrategyId};
use cadence_registry::{CapabilityCatalog, ExecutionSettings};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{ExecutionError, GenerationError};

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Inputs to one generation fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    pub strategy_id: StrategyId,
    pub signal_table: String,
    pub strategy_table: Option<String>,
    pub fired_at: DateTime<Utc>,
}

/// Produces signal payloads for a strategy.
///
/// Must either return the complete batch or fail; the engine records nothing
/// on failure.
pub trait SignalGenerator: Send + Sync {
    fn generate(
        &self,
        ctx: GenerationContext,
    ) -> BoxFuture<'_, Result<Vec<serde_json::Value>, GenerationError>>;
}

/// Executes one signal (e.g. by calling out to a broker webhook).
pub trait SignalExecutor: Send + Sync {
    fn execute<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), ExecutionError>>;

    /// Pick up new execution settings after a reload.
    fn apply_settings(&self, _settings: &ExecutionSettings) {}
}

// ============================================================================
// Capability table
// ============================================================================

/// Name → implementation table.
#[derive(Clone, Default)]
pub struct Capabilities {
    generators: HashMap<String, Arc<dyn SignalGenerator>>,
    executors: HashMap<String, Arc<dyn SignalExecutor>>,
}

impl Capabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_generator(
        mut self,
        name: impl Into<String>,
        generator: Arc<dyn SignalGenerator>,
    ) -> Self {
        self.generators.insert(name.into(), generator);
        self
    }

    #[must_use]
    pub fn with_executor(
        mut self,
        name: impl Into<String>,
        executor: Arc<dyn SignalExecutor>,
    ) -> Self {
        self.executors.insert(name.into(), executor);
        self
    }

    #[must_use]
    pub fn generator(&self, name: &str) -> Option<Arc<dyn SignalGenerator>> {
        self.generators.get(name).cloned()
    }

    #[must_use]
    pub fn executor(&self, name: &str) -> Option<Arc<dyn SignalExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Registered generator names, sorted.
    #[must_use]
    pub fn generator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered executor names, sorted.
    #[must_use]
    pub fn executor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Forward settings to every executor.
    pub fn apply_settings(&self, settings: &ExecutionSettings) {
        for executor in self.executors.values() {
            executor.apply_settings(settings);
        }
    }
}

impl CapabilityCatalog for Capabilities {
    fn has_generator(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    fn has_executor(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }
}

// ============================================================================
// Mocks
// ============================================================================

/// Mock generator for testing.
///
/// Returns a fixed batch of payloads, or an error while `set_failing(true)`.
#[derive(Debug)]
pub struct MockGenerator {
    payloads: Mutex<Vec<serde_json::Value>>,
    failing: AtomicBool,
    calls: Mutex<Vec<GenerationContext>>,
}

impl MockGenerator {
    #[must_use]
    pub fn new(payloads: Vec<serde_json::Value>) -> Self {
        Self {
            payloads: Mutex::new(payloads),
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_payloads(&self, payloads: Vec<serde_json::Value>) {
        *self.payloads.lock() = payloads;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Contexts of every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GenerationContext> {
        self.calls.lock().clone()
    }
}

impl SignalGenerator for MockGenerator {
    fn generate(
        &self,
        ctx: GenerationContext,
    ) -> BoxFuture<'_, Result<Vec<serde_json::Value>, GenerationError>> {
        Box::pin(async move {
            self.calls.lock().push(ctx);
            if self.failing.load(Ordering::SeqCst) {
                return Err(GenerationError::Failed("mock generator failure".to_string()));
            }
            Ok(self.payloads.lock().clone())
        })
    }
}

/// Mock executor for testing.
///
/// Fails any signal whose payload has `"fail": true`; succeeds otherwise.
#[derive(Debug, Default)]
pub struct MockExecutor {
    executed: Mutex<Vec<Signal>>,
    attempts: AtomicUsize,
}

impl MockExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals executed successfully, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<Signal> {
        self.executed.lock().clone()
    }

    /// Total attempts, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SignalExecutor for MockExecutor {
    fn execute<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), ExecutionError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if signal.payload.get("fail").and_then(|v| v.as_bool()) == Some(true) {
                return Err(ExecutionError::Failed(format!("signal {} rejected", signal.id)));
            }
            self.executed.lock().push(signal.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SignalId;
    use serde_json::json;

    fn ctx() -> GenerationContext {
        GenerationContext {
            strategy_id: "rotation_etf".into(),
            signal_table: "etf_signal".to_string(),
            strategy_table: None,
            fired_at: Utc::now(),
        }
    }

    #[test]
    fn test_capabilities_catalog() {
        let caps = Capabilities::new()
            .with_generator("rotation_etf", Arc::new(MockGenerator::new(vec![])))
            .with_executor("webhook", Arc::new(MockExecutor::new()));

        assert!(caps.has_generator("rotation_etf"));
        assert!(!caps.has_generator("momentum"));
        assert!(caps.has_executor("webhook"));
        assert_eq!(caps.generator_names(), vec!["rotation_etf"]);
        assert!(caps.executor("missing").is_none());
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let gen = MockGenerator::new(vec![json!({"symbol": "A"})]);
        assert_eq!(gen.generate(ctx()).await.unwrap().len(), 1);

        gen.set_failing(true);
        assert!(gen.generate(ctx()).await.is_err());
        assert_eq!(gen.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let exec = MockExecutor::new();
        let ok = Signal::new_pending(SignalId(1), "s".into(), Utc::now(), json!({}));
        let bad = Signal::new_pending(SignalId(2), "s".into(), Utc::now(), json!({"fail": true}));

        tokio_test::assert_ok!(exec.execute(&ok).await);
        tokio_test::assert_err!(exec.execute(&bad).await);
        assert_eq!(exec.attempts(), 2);
        assert_eq!(exec.executed().len(), 1);
    }
}

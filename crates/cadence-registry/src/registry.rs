//! Hot-reloadable strategy registry.
//!
//! The active configuration is an immutable [`RegistrySnapshot`] behind an
//! `Arc`. A reload validates the complete new document first and only then
//! swaps the pointer, so readers never observe a partially applied document.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use cadence_core::{StrategyId, TradingCalendar};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::document::{ConfigDocument, ExecutionSettings, StrategyConfig};
use crate::error::{RegistryError, RegistryResult};

/// Names of the generator/executor capabilities available to this process.
///
/// Checked when a document is loaded so that an unknown name fails the load
/// instead of failing at fire time.
pub trait CapabilityCatalog: Send + Sync {
    fn has_generator(&self, name: &str) -> bool;
    fn has_executor(&self, name: &str) -> bool;
}

/// One published configuration.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Monotonic version, starting at 1.
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub document: ConfigDocument,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn calendar(&self) -> &Arc<TradingCalendar> {
        &self.document.calendar
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutionSettings {
        &self.document.settings
    }

    /// Enabled strategies in declaration order.
    pub fn enabled_strategies(&self) -> impl Iterator<Item = &StrategyConfig> {
        self.document.enabled_strategies()
    }

    /// Look up a strategy, enabled or not.
    #[must_use]
    pub fn strategy(&self, id: &StrategyId) -> Option<&StrategyConfig> {
        self.document.strategies.iter().find(|s| &s.id == id)
    }
}

/// Difference between two snapshots, as consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    /// Newly enabled (or newly declared and enabled) strategies.
    pub added: Vec<StrategyId>,
    /// Strategies that were enabled and are now disabled or gone.
    pub removed: Vec<StrategyId>,
    /// Enabled before and after, with a different config or calendar.
    pub changed: Vec<StrategyId>,
    pub calendar_changed: bool,
    pub settings_changed: bool,
}

impl RegistryDiff {
    /// Compute the diff from `old` to `new`.
    #[must_use]
    pub fn between(old: &RegistrySnapshot, new: &RegistrySnapshot) -> Self {
        let calendar_changed = old.calendar() != new.calendar();
        let settings_changed = old.settings() != new.settings();

        let before: HashMap<&StrategyId, &StrategyConfig> =
            old.enabled_strategies().map(|s| (&s.id, s)).collect();

        let mut diff = Self {
            calendar_changed,
            settings_changed,
            ..Self::default()
        };

        for strategy in new.enabled_strategies() {
            match before.get(&strategy.id) {
                None => diff.added.push(strategy.id.clone()),
                Some(prev) if *prev != strategy || calendar_changed => {
                    diff.changed.push(strategy.id.clone());
                }
                Some(_) => {}
            }
        }

        for strategy in old.enabled_strategies() {
            let still_enabled = new
                .strategy(&strategy.id)
                .is_some_and(|s| s.enabled);
            if !still_enabled {
                diff.removed.push(strategy.id.clone());
            }
        }

        diff
    }

    /// True if no job needs to be touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.settings_changed
    }
}

/// Strategy registry with atomic snapshot swaps.
pub struct StrategyRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    catalog: Arc<dyn CapabilityCatalog>,
}

impl StrategyRegistry {
    /// Validate `document` and publish it as version 1.
    pub fn load(
        document: ConfigDocument,
        catalog: Arc<dyn CapabilityCatalog>,
    ) -> RegistryResult<Self> {
        check_capabilities(&document, catalog.as_ref())?;

        let snapshot = RegistrySnapshot {
            version: 1,
            loaded_at: Utc::now(),
            document,
        };
        info!(
            strategies = snapshot.document.strategies.len(),
            enabled = snapshot.enabled_strategies().count(),
            timezone = %snapshot.calendar().timezone(),
            "Strategy registry loaded"
        );

        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            catalog,
        })
    }

    /// Read a document from `path` and load it.
    pub fn load_path(
        path: impl AsRef<Path>,
        catalog: Arc<dyn CapabilityCatalog>,
    ) -> RegistryResult<Self> {
        Self::load(ConfigDocument::from_path(path)?, catalog)
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Enabled strategies of the current snapshot, in declaration order.
    #[must_use]
    pub fn enabled_strategies(&self) -> Vec<StrategyConfig> {
        self.snapshot().enabled_strategies().cloned().collect()
    }

    #[must_use]
    pub fn strategy(&self, id: &StrategyId) -> Option<StrategyConfig> {
        self.snapshot().strategy(id).cloned()
    }

    /// Replace the active document.
    ///
    /// On error the previous snapshot stays active.
    pub fn reload(&self, document: ConfigDocument) -> RegistryResult<RegistryDiff> {
        if let Err(e) = check_capabilities(&document, self.catalog.as_ref()) {
            warn!(error = %e, "Reload rejected, keeping previous configuration");
            return Err(e);
        }

        let mut current = self.current.write();
        let next = Arc::new(RegistrySnapshot {
            version: current.version + 1,
            loaded_at: Utc::now(),
            document,
        });
        let diff = RegistryDiff::between(&current, &next);
        *current = next;

        info!(
            version = current.version,
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            calendar_changed = diff.calendar_changed,
            settings_changed = diff.settings_changed,
            "Strategy registry reloaded"
        );
        Ok(diff)
    }

    /// Read a document from `path` and reload it.
    pub fn reload_path(&self, path: impl AsRef<Path>) -> RegistryResult<RegistryDiff> {
        match ConfigDocument::from_path(path) {
            Ok(document) => self.reload(document),
            Err(e) => {
                warn!(error = %e, "Reload rejected, keeping previous configuration");
                Err(e)
            }
        }
    }
}

/// Every enabled strategy must name a known generator and executor.
fn check_capabilities(
    document: &ConfigDocument,
    catalog: &dyn CapabilityCatalog,
) -> RegistryResult<()> {
    for strategy in document.enabled_strategies() {
        if !catalog.has_generator(&strategy.generator) {
            return Err(RegistryError::strategy(
                strategy.id.as_str(),
                format!("unknown generator '{}'", strategy.generator),
            ));
        }
        if !catalog.has_executor(&strategy.executor) {
            return Err(RegistryError::strategy(
                strategy.id.as_str(),
                format!("unknown executor '{}'", strategy.executor),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentFormat;

    struct StaticCatalog;

    impl CapabilityCatalog for StaticCatalog {
        fn has_generator(&self, name: &str) -> bool {
            matches!(name, "alpha" | "beta" | "gamma")
        }

        fn has_executor(&self, name: &str) -> bool {
            name == "webhook"
        }
    }

    fn strategy_toml(id: &str, enabled: bool, time: &str) -> String {
        format!(
            r#"
[strategies.{id}]
enabled = {enabled}
generator = "{id}"

[strategies.{id}.signal_generation]
frequency = "weekly"
day_of_week = "monday"
time = "{time}"

[strategies.{id}.signal_execution]
time = "10:00"
"#
        )
    }

    fn doc(holidays: &str, strategies: &[String]) -> ConfigDocument {
        let mut text = format!("[trading_calendar]\nholidays = [{holidays}]\n");
        for s in strategies {
            text.push_str(s);
        }
        ConfigDocument::parse(&text, DocumentFormat::Toml).unwrap()
    }

    fn registry(document: ConfigDocument) -> StrategyRegistry {
        StrategyRegistry::load(document, Arc::new(StaticCatalog)).unwrap()
    }

    #[test]
    fn test_enabled_strategies_in_declaration_order() {
        let reg = registry(doc(
            "",
            &[
                strategy_toml("gamma", true, "06:00"),
                strategy_toml("alpha", false, "06:00"),
                strategy_toml("beta", true, "06:00"),
            ],
        ));
        let ids: Vec<String> = reg
            .enabled_strategies()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["gamma", "beta"]);
        assert!(reg.strategy(&"alpha".into()).is_some());
        assert_eq!(reg.snapshot().version, 1);
    }

    #[test]
    fn test_unknown_generator_fails_load() {
        let result = StrategyRegistry::load(
            doc("", &[strategy_toml("delta", true, "06:00")]),
            Arc::new(StaticCatalog),
        );
        let err = result.err().unwrap();
        assert!(err.to_string().contains("unknown generator 'delta'"));
    }

    #[test]
    fn test_disabled_strategy_with_unknown_generator_is_accepted() {
        assert!(StrategyRegistry::load(
            doc("", &[strategy_toml("delta", false, "06:00")]),
            Arc::new(StaticCatalog),
        )
        .is_ok());
    }

    #[test]
    fn test_reload_diff() {
        let reg = registry(doc(
            "",
            &[
                strategy_toml("alpha", true, "06:00"),
                strategy_toml("beta", true, "06:00"),
                strategy_toml("gamma", false, "06:00"),
            ],
        ));

        let diff = reg
            .reload(doc(
                "",
                &[
                    strategy_toml("alpha", true, "06:00"),
                    strategy_toml("beta", true, "07:00"),
                    strategy_toml("gamma", true, "06:00"),
                ],
            ))
            .unwrap();
        assert_eq!(diff.added, vec![StrategyId::from("gamma")]);
        assert_eq!(diff.changed, vec![StrategyId::from("beta")]);
        assert!(diff.removed.is_empty());
        assert!(!diff.calendar_changed);
        assert_eq!(reg.snapshot().version, 2);

        // Disabling counts as removal
        let diff = reg
            .reload(doc(
                "",
                &[
                    strategy_toml("alpha", false, "06:00"),
                    strategy_toml("beta", true, "07:00"),
                ],
            ))
            .unwrap();
        assert_eq!(diff.removed, vec![StrategyId::from("alpha"), StrategyId::from("gamma")]);
        assert!(diff.added.is_empty());
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn test_calendar_change_marks_all_changed() {
        let strategies = [
            strategy_toml("alpha", true, "06:00"),
            strategy_toml("beta", true, "06:00"),
        ];
        let reg = registry(doc("", &strategies));
        let diff = reg.reload(doc("\"2025-01-27\"", &strategies)).unwrap();
        assert!(diff.calendar_changed);
        assert_eq!(diff.changed.len(), 2);
    }

    #[test]
    fn test_identical_reload_is_empty() {
        let strategies = [strategy_toml("alpha", true, "06:00")];
        let reg = registry(doc("", &strategies));
        assert!(reg.reload(doc("", &strategies)).unwrap().is_empty());
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let reg = registry(doc("", &[strategy_toml("alpha", true, "06:00")]));
        let before = reg.snapshot();

        let bad = doc("", &[strategy_toml("delta", true, "06:00")]);
        assert!(reg.reload(bad).is_err());

        let after = reg.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.version, 1);
    }

    #[test]
    fn test_reload_path_with_broken_file_keeps_previous() {
        let reg = registry(doc("", &[strategy_toml("alpha", true, "06:00")]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");
        std::fs::write(&path, "strategies = [not toml").unwrap();

        assert!(matches!(reg.reload_path(&path), Err(RegistryError::ConfigParse(_))));
        assert_eq!(reg.snapshot().version, 1);
    }
}

//! Scheduling document model.
//!
//! The document is read as TOML or JSON, normalised into a
//! `serde_json::Value` (which keeps key order) and then validated into
//! [`ConfigDocument`]. Strategies keep their declaration order.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use cadence_core::{
    is_valid_table_name, ExecutionRule, ExecutionSchedule, Frequency, GenerationSchedule,
    StrategyId, TradingCalendar, DEFAULT_WEEKEND_DAYS,
};
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RegistryError, RegistryResult};

// ============================================================================
// Execution settings
// ============================================================================

/// Process-wide execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Failures allowed before a signal becomes `failed`. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Back-off between attempts (minutes). Default: 5.
    #[serde(default = "default_retry_delay_minutes")]
    pub retry_delay_minutes: u64,
    /// Outbound webhook timeout (seconds). Default: 30.
    #[serde(default = "default_webhook_timeout_seconds")]
    pub webhook_timeout_seconds: u64,
    /// Remove executed signals after each execution fire. Default: false.
    #[serde(default)]
    pub cleanup_executed_signals: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_minutes() -> u64 {
    5
}

fn default_webhook_timeout_seconds() -> u64 {
    30
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_minutes: default_retry_delay_minutes(),
            webhook_timeout_seconds: default_webhook_timeout_seconds(),
            cleanup_executed_signals: false,
        }
    }
}

impl ExecutionSettings {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::minutes(i64::try_from(self.retry_delay_minutes).unwrap_or(i64::MAX / 60_000))
    }

    #[must_use]
    pub fn webhook_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.webhook_timeout_seconds)
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// A validated strategy entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfig {
    pub id: StrategyId,
    pub enabled: bool,
    /// Generator capability name.
    pub generator: String,
    /// Executor capability name.
    pub executor: String,
    pub signal_table: String,
    pub strategy_table: Option<String>,
    pub generation: GenerationSchedule,
    pub execution: ExecutionSchedule,
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    enabled: bool,
    #[serde(default, alias = "generator_class")]
    generator: Option<String>,
    #[serde(default = "default_executor")]
    executor: String,
    #[serde(default)]
    signal_table: Option<String>,
    #[serde(default)]
    strategy_table: Option<String>,
    signal_generation: Option<GenerationSchedule>,
    signal_execution: Option<ExecutionSchedule>,
}

fn default_executor() -> String {
    "webhook".to_string()
}

impl StrategyConfig {
    fn from_raw(key: &str, value: Value) -> RegistryResult<Self> {
        let id = StrategyId::new(key).map_err(|e| RegistryError::ConfigParse(e.to_string()))?;
        let raw: RawStrategy =
            serde_json::from_value(value).map_err(|e| RegistryError::strategy(key, e))?;

        let generation = raw
            .signal_generation
            .ok_or_else(|| RegistryError::strategy(key, "missing signal_generation"))?;
        let execution = raw
            .signal_execution
            .ok_or_else(|| RegistryError::strategy(key, "missing signal_execution"))?;

        let config = Self {
            generator: raw.generator.unwrap_or_else(|| key.to_string()),
            executor: raw.executor,
            signal_table: raw.signal_table.unwrap_or_else(|| format!("{key}_signal")),
            strategy_table: raw.strategy_table,
            enabled: raw.enabled,
            generation,
            execution,
            id,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check schedule fields required by the chosen frequency and rule.
    pub fn validate(&self) -> RegistryResult<()> {
        let id = self.id.as_str();
        let gen = &self.generation;

        match gen.frequency {
            Frequency::Weekly if gen.day_of_week.is_none() => {
                return Err(RegistryError::strategy(
                    id,
                    "weekly signal_generation requires day_of_week",
                ));
            }
            Frequency::Monthly => match gen.day_of_month {
                None => {
                    return Err(RegistryError::strategy(
                        id,
                        "monthly signal_generation requires day_of_month",
                    ));
                }
                Some(day) if !(1..=31).contains(&day) => {
                    return Err(RegistryError::strategy(
                        id,
                        format!("day_of_month {day} out of range 1..=31"),
                    ));
                }
                Some(_) => {}
            },
            _ => {}
        }

        let exec = &self.execution;
        if exec.execution_rule == ExecutionRule::SameDay
            && !exec.skip_holidays
            && exec.time < gen.time
        {
            return Err(RegistryError::strategy(
                id,
                format!(
                    "same_day execution at {} precedes generation at {}",
                    exec.time, gen.time
                ),
            ));
        }

        if self.signal_table.trim().is_empty() {
            return Err(RegistryError::strategy(id, "signal_table must not be empty"));
        }
        if !is_valid_table_name(&self.signal_table) {
            return Err(RegistryError::strategy(
                id,
                format!(
                    "signal_table '{}' may only contain ASCII letters, digits, '_' and '-'",
                    self.signal_table
                ),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Document
// ============================================================================

/// Source format of a scheduling document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// `.json` files are JSON; everything else is TOML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default)]
    trading_calendar: RawCalendar,
    #[serde(default)]
    execution_settings: ExecutionSettings,
    #[serde(default)]
    strategies: Map<String, Value>,
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

#[derive(Debug, Deserialize)]
struct RawCalendar {
    #[serde(default = "default_weekend_days")]
    weekend_days: Vec<u8>,
    #[serde(default)]
    holidays: Vec<NaiveDate>,
    /// Year-keyed lists: `holidays_<YYYY>` / `nse_holidays_<YYYY>`.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for RawCalendar {
    fn default() -> Self {
        Self {
            weekend_days: default_weekend_days(),
            holidays: Vec::new(),
            extra: Map::new(),
        }
    }
}

fn default_weekend_days() -> Vec<u8> {
    DEFAULT_WEEKEND_DAYS.to_vec()
}

fn year_keyed_holidays(key: &str) -> bool {
    key.strip_prefix("nse_holidays_")
        .or_else(|| key.strip_prefix("holidays_"))
        .is_some_and(|year| year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()))
}

impl RawCalendar {
    fn build(self, timezone: Tz) -> RegistryResult<TradingCalendar> {
        let mut holidays = self.holidays;
        for (key, value) in self.extra {
            if !year_keyed_holidays(&key) {
                continue;
            }
            let dates: Vec<NaiveDate> = serde_json::from_value(value).map_err(|e| {
                RegistryError::ConfigParse(format!("trading_calendar.{key}: {e}"))
            })?;
            holidays.extend(dates);
        }

        TradingCalendar::new(holidays, &self.weekend_days, timezone)
            .map_err(|e| RegistryError::ConfigParse(format!("trading_calendar: {e}")))
    }
}

/// A fully validated scheduling document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub calendar: Arc<TradingCalendar>,
    pub settings: ExecutionSettings,
    /// All strategies in declaration order, enabled or not.
    pub strategies: Vec<StrategyConfig>,
}

impl ConfigDocument {
    /// Parse and validate a document.
    pub fn parse(content: &str, format: DocumentFormat) -> RegistryResult<Self> {
        let value: Value = match format {
            DocumentFormat::Toml => toml::from_str(content)
                .map_err(|e| RegistryError::ConfigParse(format!("invalid TOML: {e}")))?,
            DocumentFormat::Json => serde_json::from_str(content)
                .map_err(|e| RegistryError::ConfigParse(format!("invalid JSON: {e}")))?,
        };
        Self::from_value(value)
    }

    /// Read and parse a document, picking the format from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, DocumentFormat::from_path(path))
    }

    fn from_value(value: Value) -> RegistryResult<Self> {
        let raw: RawDocument = serde_json::from_value(value)
            .map_err(|e| RegistryError::ConfigParse(e.to_string()))?;

        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|_| RegistryError::ConfigParse(format!("unknown timezone: {}", raw.timezone)))?;
        let calendar = raw.trading_calendar.build(timezone)?;

        let strategies = raw
            .strategies
            .into_iter()
            .map(|(key, value)| StrategyConfig::from_raw(&key, value))
            .collect::<RegistryResult<Vec<_>>>()?;

        Ok(Self {
            calendar: Arc::new(calendar),
            settings: raw.execution_settings,
            strategies,
        })
    }

    /// Enabled strategies in declaration order.
    pub fn enabled_strategies(&self) -> impl Iterator<Item = &StrategyConfig> {
        self.strategies.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::DayOfWeek;

    const ROTATION_TOML: &str = r#"
timezone = "Asia/Kolkata"

[trading_calendar]
weekend_days = [5, 6]
holidays = ["2025-01-26"]
holidays_2025 = ["2025-03-14"]

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

[strategies.momentum_stock]
enabled = false
generator = "momentum"
signal_table = "stock_signal"

[strategies.momentum_stock.signal_generation]
frequency = "daily"
time = "07:00"

[strategies.momentum_stock.signal_execution]
execution_rule = "next_trading_day"
time = "09:30"
"#;

    #[test]
    fn test_parse_toml_document() {
        let doc = ConfigDocument::parse(ROTATION_TOML, DocumentFormat::Toml).unwrap();

        assert_eq!(doc.calendar.timezone(), chrono_tz::Asia::Kolkata);
        assert_eq!(doc.calendar.holiday_count(), 2);
        assert!(doc.calendar.is_holiday(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()));
        assert_eq!(doc.settings, ExecutionSettings::default());

        let ids: Vec<&str> = doc.strategies.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["rotation_etf", "momentum_stock"]);

        let rotation = &doc.strategies[0];
        assert_eq!(rotation.executor, "webhook");
        assert_eq!(rotation.signal_table, "etf_signal");
        assert_eq!(rotation.strategy_table.as_deref(), Some("etf_saved_strategy"));
        assert_eq!(rotation.generation.day_of_week, Some(DayOfWeek::Monday));
        assert!(rotation.generation.skip_holidays);

        assert_eq!(doc.enabled_strategies().count(), 1);
    }

    #[test]
    fn test_parse_json_document_with_year_keys() {
        let json = r#"{
            "timezone": "Asia/Kolkata",
            "trading_calendar": {
                "nse_holidays_2025": ["2025-01-26", "2025-02-26"],
                "weekend_days": [5, 6]
            },
            "execution_settings": {"max_retries": 5, "cleanup_executed_signals": true},
            "logging": {"level": "INFO"},
            "strategies": {
                "zeta": {"enabled": true, "generator_class": "Zeta",
                         "signal_generation": {"frequency": "daily", "time": "06:00"},
                         "signal_execution": {"execution_rule": "next_trading_day", "time": "10:00"}},
                "alpha": {"enabled": true,
                          "signal_generation": {"frequency": "monthly", "day_of_month": 1, "time": "06:00"},
                          "signal_execution": {"execution_rule": "same_day", "time": "10:00"}}
            }
        }"#;
        let doc = ConfigDocument::parse(json, DocumentFormat::Json).unwrap();

        assert_eq!(doc.calendar.holiday_count(), 2);
        assert_eq!(doc.settings.max_retries, 5);
        assert_eq!(doc.settings.retry_delay_minutes, 5);
        assert!(doc.settings.cleanup_executed_signals);

        // Declaration order, not alphabetical
        assert_eq!(doc.strategies[0].id.as_str(), "zeta");
        assert_eq!(doc.strategies[0].generator, "Zeta");
        assert_eq!(doc.strategies[1].generator, "alpha");
        assert_eq!(doc.strategies[1].signal_table, "alpha_signal");
    }

    #[test]
    fn test_weekly_requires_day_of_week() {
        let doc = ROTATION_TOML.replace("day_of_week = \"monday\"\n", "");
        let err = ConfigDocument::parse(&doc, DocumentFormat::Toml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("rotation_etf"), "{msg}");
        assert!(msg.contains("day_of_week"), "{msg}");
    }

    #[test]
    fn test_signal_table_charset_checked_at_load() {
        let doc = ROTATION_TOML.replace("\"etf_signal\"", "\"etf.signal\"");
        let err = ConfigDocument::parse(&doc, DocumentFormat::Toml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("rotation_etf"), "{msg}");
        assert!(msg.contains("etf.signal"), "{msg}");
    }

    #[test]
    fn test_unknown_frequency_rejected() {
        let doc = ROTATION_TOML.replace("frequency = \"daily\"", "frequency = \"hourly\"");
        let err = ConfigDocument::parse(&doc, DocumentFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("momentum_stock"));
    }

    #[test]
    fn test_same_day_execution_before_generation_rejected() {
        let doc = ROTATION_TOML
            .replace("first_trading_day_of_week", "same_day")
            .replace("time = \"10:00\"\nskip_holidays = true", "time = \"05:00\"\nskip_holidays = false");
        let err = ConfigDocument::parse(&doc, DocumentFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("same_day"));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let doc = ROTATION_TOML.replace("Asia/Kolkata", "Mars/Olympus");
        assert!(matches!(
            ConfigDocument::parse(&doc, DocumentFormat::Toml),
            Err(RegistryError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_calendar_without_trading_days_rejected() {
        let doc = ROTATION_TOML.replace("[5, 6]", "[0, 1, 2, 3, 4, 5, 6]");
        assert!(ConfigDocument::parse(&doc, DocumentFormat::Toml).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/scheduler_config.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("config/default.toml")), DocumentFormat::Toml);
    }

    #[test]
    fn test_from_path_missing_file() {
        assert!(matches!(
            ConfigDocument::from_path("/nonexistent/cadence.toml"),
            Err(RegistryError::Io { .. })
        ));
    }
}

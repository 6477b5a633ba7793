//! External command generator.
//!
//! Runs a configured program for each generation fire and reads a JSON array
//! of signal payloads from its stdout. The fire context is passed through
//! environment variables:
//!
//! | Variable                 | Value                               |
//! |--------------------------|-------------------------------------|
//! | `CADENCE_STRATEGY`       | strategy id                         |
//! | `CADENCE_SIGNAL_TABLE`   | signal table name                   |
//! | `CADENCE_STRATEGY_TABLE` | strategy table name (if configured) |
//! | `CADENCE_FIRED_AT`       | fire instant, RFC 3339              |

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::capability::{BoxFuture, GenerationContext, SignalGenerator};
use crate::error::GenerationError;

#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Build from an argv list. The first element is the program.
    pub fn new(argv: Vec<String>) -> Result<Self, GenerationError> {
        let mut iter = argv.into_iter();
        let program = iter
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| GenerationError::Failed("Empty generator command".to_string()))?;
        Ok(Self {
            program,
            args: iter.collect(),
        })
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn parse_output(stdout: &[u8]) -> Result<Vec<serde_json::Value>, GenerationError> {
        let text = std::str::from_utf8(stdout)
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
        // Empty output means no signals this period
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Array(items)) => Ok(items),
            Ok(other) => Err(GenerationError::InvalidOutput(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(GenerationError::InvalidOutput(e.to_string())),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl SignalGenerator for CommandGenerator {
    fn generate(
        &self,
        ctx: GenerationContext,
    ) -> BoxFuture<'_, Result<Vec<serde_json::Value>, GenerationError>> {
        Box::pin(async move {
            let mut command = Command::new(&self.program);
            command
                .args(&self.args)
                .env("CADENCE_STRATEGY", ctx.strategy_id.as_str())
                .env("CADENCE_SIGNAL_TABLE", &ctx.signal_table)
                .env("CADENCE_FIRED_AT", ctx.fired_at.to_rfc3339())
                .stdin(Stdio::null())
                .kill_on_drop(true);
            if let Some(table) = &ctx.strategy_table {
                command.env("CADENCE_STRATEGY_TABLE", table);
            }

            debug!(strategy = %ctx.strategy_id, program = %self.program, "Running generator command");
            let output = command.output().await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(
                    strategy = %ctx.strategy_id,
                    status = %output.status,
                    stderr = %stderr,
                    "Generator command failed"
                );
                return Err(GenerationError::CommandFailed {
                    status: output.status.to_string(),
                    stderr,
                });
            }

            Self::parse_output(&output.stdout)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> GenerationContext {
        GenerationContext {
            strategy_id: "rotation_etf".into(),
            signal_table: "etf_signal".to_string(),
            strategy_table: Some("etf_saved_strategy".to_string()),
            fired_at: Utc::now(),
        }
    }

    fn sh(script: &str) -> CommandGenerator {
        CommandGenerator::new(vec!["sh".into(), "-c".into(), script.into()]).unwrap()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandGenerator::new(vec![]).is_err());
        assert!(CommandGenerator::new(vec!["  ".into()]).is_err());
    }

    #[test]
    fn test_parse_output() {
        assert!(CommandGenerator::parse_output(b"").unwrap().is_empty());
        assert_eq!(
            CommandGenerator::parse_output(br#"[{"a":1},{"a":2}]"#)
                .unwrap()
                .len(),
            2
        );
        assert!(matches!(
            CommandGenerator::parse_output(br#"{"a":1}"#),
            Err(GenerationError::InvalidOutput(_))
        ));
        assert!(CommandGenerator::parse_output(b"not json").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_receives_context() {
        let gen = sh(r#"printf '[{"strategy":"%s","table":"%s"}]' "$CADENCE_STRATEGY" "$CADENCE_SIGNAL_TABLE""#);
        let payloads = gen.generate(ctx()).await.unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["strategy"], "rotation_etf");
        assert_eq!(payloads[0]["table"], "etf_signal");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let gen = sh("echo boom >&2; exit 3");
        match gen.generate(ctx()).await {
            Err(GenerationError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

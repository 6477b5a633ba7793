//! Cadence signal scheduler - Entry Point
//!
//! Automated mode: arm all strategy jobs and run until interrupted
//! Manual mode: run the requested jobs once and exit

use std::path::Path;

use anyhow::{bail, Result};
use cadence_core::{JobKind, SignalId};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Long-running scheduler
    Automated,
    /// One-shot run
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Job {
    Generation,
    Execution,
    All,
}

impl Job {
    fn kinds(self) -> &'static [JobKind] {
        match self {
            Job::Generation => &[JobKind::Generation],
            Job::Execution => &[JobKind::Execution],
            Job::All => &JobKind::ALL,
        }
    }
}

/// Cadence signal scheduler
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CADENCE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Mode::Manual)]
    mode: Mode,

    /// Jobs to run in manual mode
    #[arg(short, long, value_enum, default_value_t = Job::All)]
    job: Job,

    /// Print the armed jobs and exit
    #[arg(long)]
    list_jobs: bool,

    /// Cancel a pending signal by id and exit
    #[arg(long, value_name = "SIGNAL_ID")]
    cancel: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    cadence_telemetry::init_logging()?;

    info!("Starting cadence scheduler v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > CADENCE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("CADENCE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = cadence_bot::AppConfig::from_file(&config_path)?;
    let schedule_path = config.schedule_path(Path::new(&config_path));
    info!(
        schedule_path = %schedule_path.display(),
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    let app = cadence_bot::Application::new(config, schedule_path)?;

    if args.list_jobs {
        app.start();
        for (key, at) in app.armed_jobs() {
            println!("{:<40} {at}", key.to_string());
        }
        app.shutdown().await?;
        return Ok(());
    }

    if let Some(id) = args.cancel {
        let id = SignalId(id);
        if app.cancel_signal(id)? {
            info!(signal_id = %id, "Signal cancelled");
        } else {
            info!(signal_id = %id, "Signal was already cancelled");
        }
        return Ok(());
    }

    match args.mode {
        Mode::Automated => app.run_automated().await?,
        Mode::Manual => {
            let reports = app.run_manual(args.job.kinds()).await?;
            let mut failures = 0;
            for report in &reports {
                if let Some(generated) = &report.generated {
                    match generated {
                        Ok(count) => info!(strategy = %report.strategy, count, "Generation done"),
                        Err(e) => {
                            failures += 1;
                            error!(strategy = %report.strategy, error = %e, "Generation failed");
                        }
                    }
                }
                if let Some(execution) = &report.execution {
                    match execution {
                        Ok(summary) => info!(strategy = %report.strategy, ?summary, "Execution done"),
                        Err(e) => {
                            failures += 1;
                            error!(strategy = %report.strategy, error = %e, "Execution failed");
                        }
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} manual job(s) failed");
            }
        }
    }

    Ok(())
}

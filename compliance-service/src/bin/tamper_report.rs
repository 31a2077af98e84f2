//! Tamper report binary
//!
//! Verifies one chain (first argument) or every chain, writes one report per
//! chain and exits with status 1 if any chain is invalid.
//!
//! Environment:
//! - `LEDGER_CONFIG`: TOML config file (otherwise `LEDGER_*` variables;
//!   `LEDGER_VERIFYING_KEY` checks seals of a sealed store)
//! - `REPORT_OUTPUT_DIR`: where reports are written (default `./data/reports`)
//! - `REPORT_FORMAT`: `json` (default) or `csv`
//! - `LOG_FORMAT`: `json` for structured log lines

use anyhow::Context;
use compliance_service::{ComplianceReporter, ReportConfig, ReportFormat};
use ledger_core::{ChainId, Config, Ledger};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = if let Ok(config_path) = std::env::var("LEDGER_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path).context("loading ledger config")?
    } else {
        info!("Loading config from environment variables");
        Config::from_env().context("reading ledger environment")?
    };

    let mut report_config = ReportConfig::default();
    if let Ok(dir) = std::env::var("REPORT_OUTPUT_DIR") {
        report_config.output_dir = dir.into();
    }
    let format: ReportFormat = std::env::var("REPORT_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .parse()?;

    info!("Opening ledger at: {:?}", config.data_dir);
    let ledger = Ledger::open(config).context("opening ledger")?;
    let reporter = ComplianceReporter::new(&ledger, report_config)?;

    let reports = match std::env::args().nth(1) {
        Some(chain) => vec![reporter.tamper_report(&ChainId::new(chain))?],
        None => reporter.tamper_report_all()?,
    };

    let mut invalid = 0;
    for report in &reports {
        let file = reporter.write_report(report, format)?;
        println!(
            "{}\t{}\t{} entries\t{}",
            report.chain_id,
            if report.valid { "OK" } else { "TAMPERED" },
            report.total_entries,
            file.file_path.display()
        );
        if !report.valid {
            invalid += 1;
        }
    }

    info!(chains = reports.len(), invalid, "Verification finished");

    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}

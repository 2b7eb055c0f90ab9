use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

mod breakdown;
mod cli;
mod config;
mod critical_path;
mod csv_output;
mod driver;
mod error;
mod segment;
mod span_graph;
mod trigger;

use cli::{Cli, Command};
use config::AnalyzerConfig;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn sibling_path(traces: &std::path::Path, name: &str) -> std::path::PathBuf {
    traces
        .parent()
        .map(|p| p.join(name))
        .unwrap_or_else(|| std::path::PathBuf::from(name))
}

fn run_breakdown(traces: &std::path::Path, workers: Option<usize>) -> Result<()> {
    let config = AnalyzerConfig::default();
    let mut driver_config = driver::DriverConfig::default();
    if let Some(n) = workers {
        driver_config.num_workers = n.max(1);
    }

    let input = BufReader::new(
        File::open(traces).with_context(|| format!("opening {}", traces.display()))?,
    );
    let breakdown_out = BufWriter::new(File::create(sibling_path(traces, "trace_breakdown.csv"))?);
    let invalid_out = BufWriter::new(File::create(sibling_path(traces, "invalid_traces.csv"))?);

    let cancel = Arc::new(AtomicBool::new(false));
    let summary = driver::run_breakdown_batch(
        input,
        breakdown_out,
        invalid_out,
        &config,
        &driver_config,
        cancel,
    )?;

    tracing::info!(
        valid = summary.num_valid,
        invalid = summary.num_invalid,
        "breakdown analysis complete"
    );
    Ok(())
}

fn run_trigger(traces: &std::path::Path) -> Result<()> {
    let config = AnalyzerConfig::default();
    let input = BufReader::new(
        File::open(traces).with_context(|| format!("opening {}", traces.display()))?,
    );
    let mut trigger_out = BufWriter::new(File::create(sibling_path(traces, "trigger.csv"))?);
    let mut invalid_out = BufWriter::new(File::create(sibling_path(
        traces,
        "trigger_invalid_traces.csv",
    ))?);

    writeln!(
        trigger_out,
        "{}",
        csv_output::trigger_fields(config.num_receiver_timestamps).join(",")
    )?;
    writeln!(invalid_out, "trace_id,message")?;

    let mut correlator = trigger::TriggerCorrelator::new(&config);
    let mut num_valid = 0u64;
    let mut num_invalid = 0u64;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        for outcome in correlator.process_line(&line, &config) {
            match outcome {
                Ok(row) => {
                    writeln!(trigger_out, "{}", row.to_csv_row(config.num_receiver_timestamps))?;
                    num_valid += 1;
                }
                Err(invalid) => {
                    writeln!(invalid_out, "{}", invalid.to_csv_row())?;
                    num_invalid += 1;
                }
            }
        }
    }

    for outcome in correlator.flush(&config) {
        match outcome {
            Ok(row) => {
                writeln!(trigger_out, "{}", row.to_csv_row(config.num_receiver_timestamps))?;
                num_valid += 1;
            }
            Err(invalid) => {
                writeln!(invalid_out, "{}", invalid.to_csv_row())?;
                num_invalid += 1;
            }
        }
    }

    trigger_out.flush()?;
    invalid_out.flush()?;

    if num_invalid > 0 {
        let rate = num_invalid as f64 / (num_valid + num_invalid) as f64 * 100.0;
        tracing::warn!(invalid = num_invalid, rate_pct = rate, "trigger analysis found invalid traces");
    } else {
        tracing::info!(valid = num_valid, "trigger analysis complete");
    }
    Ok(())
}

fn run_migrate(traces: &std::path::Path, replace: bool) -> Result<()> {
    let target = segment::migrate_legacy_to_jsonl(traces, replace)?;
    tracing::info!(output = %target.display(), "migrated legacy trace log to JSONL");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Breakdown { traces } => run_breakdown(&traces, cli.workers),
        Command::Trigger { traces } => run_trigger(&traces),
        Command::Migrate { traces, replace } => run_migrate(&traces, replace),
    }
}

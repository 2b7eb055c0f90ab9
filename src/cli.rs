//! CLI argument parsing for the trace breakdown analyzer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "trace-breakdown")]
#[command(version)]
#[command(about = "Critical-path and latency-breakdown analysis for serverless traces", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of worker threads to use for batch analysis. Defaults to the
    /// available CPU parallelism.
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Computes critical path and latency breakdown for every trace in a
    /// JSONL trace log, writing `trace_breakdown.csv` and
    /// `invalid_traces.csv` alongside it.
    Breakdown {
        /// Path to the traces JSONL file.
        traces: PathBuf,
    },
    /// Correlates disconnected parent/child traces via their
    /// `root_trace_id` annotation and writes `trigger.csv` and
    /// `trigger_invalid_traces.csv` alongside the input file.
    Trigger {
        /// Path to the traces JSONL file.
        traces: PathBuf,
    },
    /// Rewrites a legacy single-JSON-object trace log into one-trace-per-line
    /// JSONL.
    Migrate {
        /// Path to the legacy traces file.
        traces: PathBuf,
        /// Replace the original file in place instead of writing a
        /// `.jsonl` sibling.
        #[arg(long)]
        replace: bool,
    },
}

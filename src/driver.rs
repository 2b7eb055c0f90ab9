//! Batch driver: streams a JSONL trace log through a bounded worker pool,
//! isolates per-trace failures, and serializes CSV output through a single
//! writer.
//!
//! The shape generalizes the hot-path/cold-path split worker threads do the
//! CPU-bound graph-building and breakdown work, while a single writer
//! drains their results and owns the two output files, so no lock is ever
//! held across an I/O call. `crossbeam::channel`'s bounded work queue gives
//! the reader thread natural backpressure: it blocks rather than buffering
//! the whole trace log in memory when workers fall behind.

use crate::breakdown::extract_trace_breakdown;
use crate::config::AnalyzerConfig;
use crate::csv_output::{BreakdownRow, InvalidRow};
use crate::error::AnalysisError;
use crate::segment::{JsonlTraceReader, RawTrace};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Tunables for the worker pool, independent of the analysis-level
/// `AnalyzerConfig`.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub num_workers: usize,
    pub queue_capacity: usize,
    /// Traces that take longer than this to analyze are reported as
    /// invalid rather than blocking the batch indefinitely. Checked after
    /// a trace finishes analysis, not preemptively: the recursive
    /// critical-path walk has no natural yield point to interrupt mid-call.
    pub soft_timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            num_workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: 1024,
            soft_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Totals reported once a batch run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriverSummary {
    pub num_valid: u64,
    pub num_invalid: u64,
}

impl DriverSummary {
    pub fn invalid_rate(&self) -> f64 {
        let total = self.num_valid + self.num_invalid;
        if total == 0 {
            0.0
        } else {
            self.num_invalid as f64 / total as f64 * 100.0
        }
    }
}

enum WorkItem {
    Raw {
        parsed: Result<RawTrace, AnalysisError>,
    },
}

enum Outcome {
    Valid(BreakdownRow),
    Invalid(InvalidRow),
}

fn analyze_one(
    parsed: Result<RawTrace, AnalysisError>,
    config: &AnalyzerConfig,
    soft_timeout: Option<Duration>,
) -> Outcome {
    let trace = match parsed {
        Ok(trace) => trace,
        Err(e) => {
            return Outcome::Invalid(InvalidRow {
                trace_id: None,
                message: e.to_string(),
            })
        }
    };
    let trace_id = trace.id.clone();
    let started = Instant::now();
    match extract_trace_breakdown(&trace, config) {
        Ok((graph, _critical, breakdown)) => {
            if let Some(timeout) = soft_timeout {
                if started.elapsed() > timeout {
                    return Outcome::Invalid(InvalidRow {
                        trace_id: Some(trace_id),
                        message: format!(
                            "trace analysis exceeded soft timeout of {timeout:?}"
                        ),
                    });
                }
            }
            Outcome::Valid(BreakdownRow::from_analysis(&graph, &breakdown))
        }
        Err(e) => Outcome::Invalid(InvalidRow {
            trace_id: Some(trace_id),
            message: e.to_string(),
        }),
    }
}

fn worker_loop(
    work_rx: Receiver<WorkItem>,
    out_tx: Sender<Outcome>,
    config: AnalyzerConfig,
    soft_timeout: Option<Duration>,
    cancel: Arc<AtomicBool>,
) {
    while let Ok(item) = work_rx.recv() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let WorkItem::Raw { parsed } = item;
        let outcome = analyze_one(parsed, &config, soft_timeout);
        if out_tx.send(outcome).is_err() {
            break;
        }
    }
}

/// Runs a full batch: reads traces from `reader`, fans them out across a
/// worker pool, and writes results to `breakdown_out`/`invalid_out` as they
/// complete. Each output writer receives only `write_all` calls from this
/// thread, so no locking is needed around them.
pub fn run_breakdown_batch<R, W1, W2>(
    reader: R,
    mut breakdown_out: W1,
    mut invalid_out: W2,
    config: &AnalyzerConfig,
    driver_config: &DriverConfig,
    cancel: Arc<AtomicBool>,
) -> anyhow::Result<DriverSummary>
where
    R: BufRead,
    W1: Write,
    W2: Write,
{
    let (work_tx, work_rx) = bounded::<WorkItem>(driver_config.queue_capacity);
    let (out_tx, out_rx) = bounded::<Outcome>(driver_config.queue_capacity);

    let mut handles = Vec::with_capacity(driver_config.num_workers);
    for _ in 0..driver_config.num_workers.max(1) {
        let work_rx = work_rx.clone();
        let out_tx = out_tx.clone();
        let config = *config;
        let soft_timeout = driver_config.soft_timeout;
        let cancel = cancel.clone();
        handles.push(thread::spawn(move || {
            worker_loop(work_rx, out_tx, config, soft_timeout, cancel);
        }));
    }
    drop(out_tx);

    writeln!(breakdown_out, "{}", crate::csv_output::BREAKDOWN_FIELDS.join(","))?;
    writeln!(invalid_out, "trace_id,message")?;

    let feeder_cancel = cancel.clone();
    let feeder = thread::spawn(move || {
        let trace_reader = JsonlTraceReader::new(reader);
        for (_raw_line, parsed) in trace_reader {
            if feeder_cancel.load(Ordering::Relaxed) {
                break;
            }
            if work_tx.send(WorkItem::Raw { parsed }).is_err() {
                break;
            }
        }
    });

    let mut summary = DriverSummary::default();
    for outcome in out_rx {
        match outcome {
            Outcome::Valid(row) => {
                writeln!(breakdown_out, "{}", row.to_csv_row())?;
                summary.num_valid += 1;
            }
            Outcome::Invalid(row) => {
                writeln!(invalid_out, "{}", row.to_csv_row())?;
                summary.num_invalid += 1;
            }
        }
    }

    let _ = feeder.join();
    for handle in handles {
        let _ = handle.join();
    }

    breakdown_out.flush()?;
    invalid_out.flush()?;

    if summary.num_invalid > 0 {
        tracing::warn!(
            invalid = summary.num_invalid,
            valid = summary.num_valid,
            rate_pct = summary.invalid_rate(),
            "batch completed with invalid traces"
        );
    } else {
        tracing::info!(valid = summary.num_valid, "batch completed");
    }

    Ok(summary)
}

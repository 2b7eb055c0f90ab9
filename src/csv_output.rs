//! CSV row formatting for breakdown, trigger, and invalid-trace output.
//!
//! Field escaping follows `csv.QUOTE_MINIMAL`: a field is quoted only when
//! it contains a comma, a quote, or a newline. List-typed fields
//! (`services`, `longest_path_names`) are rendered the way Python's
//! `csv.writer` stringifies a `list` value (`str(list)`), so downstream
//! tooling built against the original analyzer's output keeps working.

use crate::breakdown::{BreakdownResult, Category};
use crate::span_graph::SpanGraph;
use std::collections::HashMap;

/// CSV column order for the trace breakdown output. Fixed and exhaustive —
/// every category appears even when a trace never produces an interval of
/// that kind (see `format_category`).
pub const BREAKDOWN_FIELDS: [&str; 20] = [
    "trace_id",
    "start_time",
    "end_time",
    "duration",
    "url",
    "num_cold_starts",
    "errors",
    "throttles",
    "faults",
    "services",
    "longest_path_names",
    "orchestration",
    "trigger",
    "container_initialization",
    "runtime_initialization",
    "computation",
    "queing",
    "overhead",
    "external_service",
    "unclassified",
];

/// A single row of `trace_breakdown.csv`.
pub struct BreakdownRow {
    pub trace_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub url: Option<String>,
    pub num_cold_starts: usize,
    pub errors: usize,
    pub throttles: usize,
    pub faults: usize,
    pub services: Vec<String>,
    pub longest_path_names: Vec<String>,
    pub categories: HashMap<&'static str, f64>,
}

impl BreakdownRow {
    pub fn from_analysis(graph: &SpanGraph, breakdown: &BreakdownResult) -> Self {
        Self {
            trace_id: graph.trace_id.clone(),
            start_time: graph.start_time,
            end_time: graph.end_time,
            duration: graph.duration,
            url: graph.url.clone(),
            num_cold_starts: breakdown.num_cold_starts,
            errors: graph.errors,
            throttles: graph.throttles,
            faults: graph.faults,
            services: graph.services.clone(),
            longest_path_names: breakdown.longest_path_names.clone(),
            categories: breakdown.category_totals.clone(),
        }
    }

    /// Renders the row in `BREAKDOWN_FIELDS` order.
    pub fn to_csv_row(&self) -> String {
        let mut fields: Vec<String> = vec![
            escape_field(&self.trace_id),
            self.start_time.to_string(),
            self.end_time.to_string(),
            format_duration(self.duration),
            self.url.as_deref().map(escape_field).unwrap_or_default(),
            self.num_cold_starts.to_string(),
            self.errors.to_string(),
            self.throttles.to_string(),
            self.faults.to_string(),
            escape_field(&format_list(&self.services)),
            escape_field(&format_list(&self.longest_path_names)),
        ];
        for category in Category::ALL {
            let cell = self
                .categories
                .get(category.as_str())
                .map(|d| format_duration(*d))
                .unwrap_or_default();
            fields.push(cell);
        }
        fields.join(",")
    }
}

/// CSV column order for `trigger.csv`, parameterized by the number of
/// `receiverN` landmark timestamps the correlator looks for.
pub fn trigger_fields(num_receiver_timestamps: u32) -> Vec<String> {
    let mut fields = vec![
        "root_trace_id".to_string(),
        "child_trace_id".to_string(),
        "t1".to_string(),
        "t2".to_string(),
        "t3".to_string(),
        "t4".to_string(),
    ];
    for n in 1..=num_receiver_timestamps {
        fields.push(format!("t{}", n + 4));
    }
    fields.push("coldstart_f1".to_string());
    fields.push("coldstart_f2".to_string());
    fields
}

/// A single row of `trigger.csv`.
///
/// Landmark timestamps are kept as raw epoch seconds rather than converted
/// to a formatted datetime (as the original Python analyzer does): the
/// trace documents this crate reads already carry epoch-second
/// timestamps, and re-deriving a UTC datetime string only to write it back
/// to CSV adds a lossy round-trip with no benefit to downstream consumers
/// that parse the column as a float.
pub struct TriggerRow {
    pub root_trace_id: Option<String>,
    pub child_trace_id: Option<String>,
    pub timestamps: HashMap<String, f64>,
    pub coldstart_f1: Option<bool>,
    pub coldstart_f2: Option<bool>,
}

impl TriggerRow {
    pub fn to_csv_row(&self, num_receiver_timestamps: u32) -> String {
        let mut fields = vec![
            self.root_trace_id
                .as_deref()
                .map(escape_field)
                .unwrap_or_default(),
            self.child_trace_id
                .as_deref()
                .map(escape_field)
                .unwrap_or_default(),
        ];
        for key in ["t1", "t2", "t3", "t4"] {
            fields.push(
                self.timestamps
                    .get(key)
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            );
        }
        for n in 1..=num_receiver_timestamps {
            let key = format!("t{}", n + 4);
            fields.push(
                self.timestamps
                    .get(&key)
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            );
        }
        fields.push(
            self.coldstart_f1
                .map(|b| b.to_string())
                .unwrap_or_default(),
        );
        fields.push(
            self.coldstart_f2
                .map(|b| b.to_string())
                .unwrap_or_default(),
        );
        fields.join(",")
    }
}

/// A single row of `invalid_traces.csv` / `trigger_invalid_traces.csv`.
pub struct InvalidRow {
    pub trace_id: Option<String>,
    pub message: String,
}

impl InvalidRow {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{}",
            self.trace_id.as_deref().map(escape_field).unwrap_or_default(),
            escape_field(&self.message)
        )
    }
}

/// Quotes a field only if it contains a comma, quote, or newline, matching
/// `csv.QUOTE_MINIMAL`.
pub fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Formats a (non-negative) duration in seconds the way Python's
/// `str(timedelta)` does: `H:MM:SS` with an optional zero-padded
/// microsecond suffix, hours left unpadded.
pub fn format_duration(seconds: f64) -> String {
    let total_micros = (seconds * 1_000_000.0).round() as i64;
    let total_micros = total_micros.max(0);
    let micros = total_micros % 1_000_000;
    let total_secs = total_micros / 1_000_000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    if micros == 0 {
        format!("{hours}:{mins:02}:{secs:02}")
    } else {
        format!("{hours}:{mins:02}:{secs:02}.{micros:06}")
    }
}

/// Renders a string list the way Python's `str(list)` does:
/// `['a', 'b']`, single-quoted elements unless an element itself contains
/// a single quote (in which case double quotes are used, mirroring
/// Python's `repr()` quote-preference rule).
pub fn format_list(items: &[String]) -> String {
    let parts: Vec<String> = items.iter().map(|s| python_repr(s)).collect();
    format!("[{}]", parts.join(", "))
}

fn python_repr(s: &str) -> String {
    let has_single = s.contains('\'');
    let has_double = s.contains('"');
    let quote = if has_single && !has_double { '"' } else { '\'' };
    let mut out = String::new();
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

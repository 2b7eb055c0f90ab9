//! Correlates disconnected traces that share a custom `root_trace_id`
//! annotation and extracts landmark timestamps from the pair.
//!
//! This analyzer is not generic: it expects exactly two Lambda functions,
//! where the first (F1) triggers the second (F2) through an intermediary
//! service, either synchronously (API Gateway) or asynchronously (S3, SQS,
//! SNS). The trace for F2 carries a custom annotation pointing back at F1's
//! trace id, since X-Ray itself has no notion of linking two otherwise
//! unrelated traces together.
//!
//! Traces arrive one line at a time and don't necessarily arrive in
//! parent-then-child order, so unmatched halves are cached until their
//! counterpart shows up (see `BoundedCache`).

use crate::config::AnalyzerConfig;
use crate::csv_output::{InvalidRow, TriggerRow};
use crate::error::{AnalysisError, Result};
use crate::segment::{parse_trace_segments, RawSegment, RawTrace};
use regex::Regex;
use std::collections::{HashMap, VecDeque};

const SEARCH_ROOT_TRACE_ID: &str = r#"\\"root_trace_id\\":\\"(\d-[a-z0-9]{8}-[a-z0-9]{24})"#;
const SEARCH_TRACE_ID: &str = r#"^\{"Id":\s?"(\d-[a-z0-9]{8}-[a-z0-9]{24})""#;

/// Extracts the `root_trace_id` annotation from a raw trace line via regex,
/// without paying for a full JSON parse of the (possibly large) trace.
pub fn extract_root_trace_id(re: &Regex, line: &str) -> Option<String> {
    re.captures(line).map(|c| c[1].to_string())
}

/// Extracts the top-level trace id from a raw trace line via regex.
pub fn extract_trace_id(re: &Regex, line: &str) -> Option<String> {
    re.captures(line).map(|c| c[1].to_string())
}

fn is_coldstart(segment: &RawSegment) -> bool {
    segment
        .subsegments
        .iter()
        .any(|s| s.name == "Initialization")
}

#[derive(Default)]
struct TriggerAccumulator {
    root_trace_id: Option<String>,
    child_trace_id: Option<String>,
    timestamps: HashMap<String, f64>,
    coldstart_f1: Option<bool>,
    coldstart_f2: Option<bool>,
}

impl TriggerAccumulator {
    fn into_row(self) -> TriggerRow {
        TriggerRow {
            root_trace_id: self.root_trace_id,
            child_trace_id: self.child_trace_id,
            timestamps: self.timestamps,
            coldstart_f1: self.coldstart_f1,
            coldstart_f2: self.coldstart_f2,
        }
    }
}

fn extract_landmarks(
    segment: &RawSegment,
    acc: &mut TriggerAccumulator,
    config: &AnalyzerConfig,
) -> Result<()> {
    if segment.name.ends_with("_trigger") {
        acc.timestamps.insert("t1".to_string(), segment.start_time);
        acc.timestamps.insert(
            "t2".to_string(),
            segment.end_time.unwrap_or(segment.start_time),
        );
    }
    if segment.origin.as_deref() == Some("AWS::Lambda") && segment.name.contains("TriggerLambda") {
        acc.timestamps.insert("t3".to_string(), segment.start_time);
    }
    if segment.name == "receiver0" {
        acc.timestamps.insert("t4".to_string(), segment.start_time);
    }
    for n in 1..=config.num_receiver_timestamps {
        if segment.name == format!("receiver{n}") {
            acc.timestamps
                .insert(format!("t{}", n + 4), segment.start_time);
        }
    }
    if segment.origin.as_deref() == Some("AWS::Lambda::Function")
        && segment.name.starts_with("InfraLambda")
    {
        acc.coldstart_f1 = Some(is_coldstart(segment));
    }
    if segment.origin.as_deref() == Some("AWS::Lambda::Function")
        && segment.name.contains("TriggerLambda")
    {
        acc.coldstart_f2 = Some(is_coldstart(segment));
    }
    if segment.in_progress {
        return Err(AnalysisError::InProgressSegment(segment.id.clone()));
    }
    if segment.error {
        return Err(AnalysisError::SegmentError(segment.id.clone()));
    }
    Ok(())
}

fn walk_segment(
    segment: &RawSegment,
    acc: &mut TriggerAccumulator,
    config: &AnalyzerConfig,
) -> Result<()> {
    extract_landmarks(segment, acc, config)?;
    for sub in &segment.subsegments {
        walk_segment(sub, acc, config)?;
    }
    Ok(())
}

/// Extracts landmark timestamps from a single, fully self-contained trace
/// (no `root_trace_id` annotation pointing elsewhere, or its match was never
/// found).
pub fn analyze_trace(trace: &RawTrace, config: &AnalyzerConfig) -> Result<TriggerRow> {
    let segments = parse_trace_segments(trace)?;
    let mut acc = TriggerAccumulator {
        root_trace_id: Some(trace.id.clone()),
        ..Default::default()
    };
    for segment in &segments {
        walk_segment(segment, &mut acc, config)?;
    }
    Ok(acc.into_row())
}

/// Merges a parent trace (F1's) and a child trace (F2's, found via its
/// `root_trace_id` annotation) and extracts landmarks from both.
pub fn merge_and_analyze_traces(
    parent: &RawTrace,
    child: &RawTrace,
    config: &AnalyzerConfig,
) -> Result<TriggerRow> {
    let mut acc = TriggerAccumulator {
        root_trace_id: Some(parent.id.clone()),
        child_trace_id: Some(child.id.clone()),
        ..Default::default()
    };
    for segment in &parse_trace_segments(child)? {
        walk_segment(segment, &mut acc, config)?;
    }
    for segment in &parse_trace_segments(parent)? {
        walk_segment(segment, &mut acc, config)?;
    }
    Ok(acc.into_row())
}

struct PendingTrace {
    trace: RawTrace,
}

/// An insertion-order-evicting cache: once full, inserting a new key evicts
/// the oldest pending entry rather than growing without bound. The evicted
/// entry is handed back to the caller, which treats it as a fully-connected
/// trace and analyzes it on its own — the same thing `flush` does for
/// whatever is still pending once the input is exhausted.
struct BoundedCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, PendingTrace>,
}

impl BoundedCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, key: String, value: PendingTrace) -> Option<PendingTrace> {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, value);
        if self.order.len() > self.capacity {
            let evicted_key = self.order.pop_front()?;
            return self.entries.remove(&evicted_key);
        }
        None
    }

    fn remove(&mut self, key: &str) -> Option<PendingTrace> {
        let value = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(value)
    }

    fn drain(&mut self) -> Vec<PendingTrace> {
        self.order.clear();
        self.entries.drain().map(|(_, v)| v).collect()
    }
}

/// Streaming correlator over a traces JSONL file: matches parent and child
/// halves as they arrive, in either order.
pub struct TriggerCorrelator {
    parents: BoundedCache,
    children: BoundedCache,
    root_trace_id_re: Regex,
    trace_id_re: Regex,
}

impl TriggerCorrelator {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            parents: BoundedCache::new(config.trigger_cache_capacity),
            children: BoundedCache::new(config.trigger_cache_capacity),
            root_trace_id_re: Regex::new(SEARCH_ROOT_TRACE_ID)
                .expect("trigger id pattern is a fixed, valid regex"),
            trace_id_re: Regex::new(SEARCH_TRACE_ID)
                .expect("trace id pattern is a fixed, valid regex"),
        }
    }

    /// Feeds one raw JSONL line in. Returns zero, one, or two outcomes: zero
    /// while the line's other half is still pending and no eviction
    /// occurred; one when a pair completes (or the line itself is
    /// malformed); two when inserting this line's unmatched half evicts an
    /// older unmatched trace, which is analyzed standalone and reported
    /// alongside whatever this line produced.
    pub fn process_line(
        &mut self,
        line: &str,
        config: &AnalyzerConfig,
    ) -> Vec<std::result::Result<TriggerRow, InvalidRow>> {
        let mut out = Vec::new();
        match self.process_line_inner(line, config) {
            Ok((row, evicted)) => {
                if let Some(row) = row {
                    out.push(Ok(row));
                }
                if let Some(pending) = evicted {
                    out.push(Self::analyze_evicted(pending, config));
                }
            }
            Err(e) => out.push(Err(InvalidRow {
                trace_id: extract_trace_id(&self.trace_id_re, line),
                message: e.to_string(),
            })),
        }
        out
    }

    fn analyze_evicted(
        pending: PendingTrace,
        config: &AnalyzerConfig,
    ) -> std::result::Result<TriggerRow, InvalidRow> {
        let trace_id = pending.trace.id.clone();
        analyze_trace(&pending.trace, config).map_err(|e| InvalidRow {
            trace_id: Some(trace_id),
            message: e.to_string(),
        })
    }

    /// Returns the completed pair's row (if any) and an entry evicted from
    /// one of the caches by this line's insert (if any). At most one of the
    /// two caches is ever inserted into per line, so at most one eviction
    /// can happen.
    fn process_line_inner(
        &mut self,
        line: &str,
        config: &AnalyzerConfig,
    ) -> Result<(Option<TriggerRow>, Option<PendingTrace>)> {
        if let Some(root_trace_id) = extract_root_trace_id(&self.root_trace_id_re, line) {
            let child: RawTrace = serde_json::from_str(line)?;
            if let Some(pending_parent) = self.parents.remove(&root_trace_id) {
                let row = merge_and_analyze_traces(&pending_parent.trace, &child, config)?;
                return Ok((Some(row), None));
            }
            let evicted = self
                .children
                .insert(root_trace_id, PendingTrace { trace: child });
            return Ok((None, evicted));
        }

        let trace_id = extract_trace_id(&self.trace_id_re, line);
        let parent: RawTrace = serde_json::from_str(line)?;
        if let Some(ref tid) = trace_id {
            if let Some(pending_child) = self.children.remove(tid) {
                let row = merge_and_analyze_traces(&parent, &pending_child.trace, config)?;
                return Ok((Some(row), None));
            }
        }
        if let Some(tid) = trace_id {
            let evicted = self.parents.insert(tid, PendingTrace { trace: parent });
            return Ok((None, evicted));
        }
        Ok((None, None))
    }

    /// Treats every still-unmatched parent trace as fully self-contained
    /// and analyzes it on its own. Unmatched children are left behind: a
    /// trigger trace with no corresponding parent can't be completed and
    /// was never written by the original analyzer either.
    pub fn flush(
        &mut self,
        config: &AnalyzerConfig,
    ) -> Vec<std::result::Result<TriggerRow, InvalidRow>> {
        self.parents
            .drain()
            .into_iter()
            .map(|pending| Self::analyze_evicted(pending, config))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentWrapper;

    fn wrapper(doc: &str) -> SegmentWrapper {
        SegmentWrapper {
            id: None,
            document: doc.to_string(),
        }
    }

    fn trace_line(id: &str, docs: Vec<&str>) -> String {
        let trace = RawTrace {
            id: id.to_string(),
            duration: Some(1.0),
            limit_exceeded: Some(false),
            segments: docs.into_iter().map(wrapper).collect(),
        };
        serde_json::to_string(&trace).unwrap()
    }

    #[test]
    fn extracts_root_trace_id_from_escaped_json() {
        let re = Regex::new(SEARCH_ROOT_TRACE_ID).unwrap();
        let line = r#"{"Id":"1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb","Document":"{\"annotations\":{\"root_trace_id\":\"1-cccccccc-dddddddddddddddddddddddd\"}}"}"#;
        assert_eq!(
            extract_root_trace_id(&re, line),
            Some("1-cccccccc-dddddddddddddddddddddddd".to_string())
        );
    }

    #[test]
    fn extracts_plain_trace_id() {
        let re = Regex::new(SEARCH_TRACE_ID).unwrap();
        let line = r#"{"Id": "1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb","Duration":1.0}"#;
        assert_eq!(
            extract_trace_id(&re, line),
            Some("1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb".to_string())
        );
    }

    #[test]
    fn analyze_trace_collects_landmarks() {
        let trace = RawTrace {
            id: "1-abc".to_string(),
            duration: Some(1.0),
            limit_exceeded: Some(false),
            segments: vec![wrapper(
                r#"{"id":"a","name":"api_trigger","start_time":1.0,"end_time":1.2}"#,
            )],
        };
        let row = analyze_trace(&trace, &AnalyzerConfig::default()).unwrap();
        assert_eq!(row.root_trace_id, Some("1-abc".to_string()));
        assert_eq!(row.timestamps.get("t1"), Some(&1.0));
        assert_eq!(row.timestamps.get("t2"), Some(&1.2));
    }

    #[test]
    fn in_progress_segment_is_rejected() {
        let trace = RawTrace {
            id: "1-abc".to_string(),
            duration: Some(1.0),
            limit_exceeded: Some(false),
            segments: vec![wrapper(
                r#"{"id":"a","name":"root","start_time":1.0,"end_time":null,"in_progress":true}"#,
            )],
        };
        let err = analyze_trace(&trace, &AnalyzerConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InProgressSegment(_)));
    }

    #[test]
    fn is_coldstart_detects_initialization_subsegment() {
        let seg: RawSegment = serde_json::from_str(
            r#"{"id":"a","name":"InfraLambda","start_time":0.0,"end_time":1.0,
               "subsegments":[{"id":"b","name":"Initialization","start_time":0.0,"end_time":0.2}]}"#,
        )
        .unwrap();
        assert!(is_coldstart(&seg));
    }

    #[test]
    fn bounded_cache_evicts_oldest_entry() {
        let mut cache = BoundedCache::new(1);
        cache.insert(
            "a".to_string(),
            PendingTrace {
                trace: RawTrace {
                    id: "a".to_string(),
                    duration: Some(1.0),
                    limit_exceeded: Some(false),
                    segments: vec![],
                },
            },
        );
        cache.insert(
            "b".to_string(),
            PendingTrace {
                trace: RawTrace {
                    id: "b".to_string(),
                    duration: Some(1.0),
                    limit_exceeded: Some(false),
                    segments: vec![],
                },
            },
        );
        assert!(cache.remove("a").is_none());
        assert!(cache.remove("b").is_some());
    }

    #[test]
    fn unmatched_parent_is_flushed_standalone() {
        let mut correlator = TriggerCorrelator::new(&AnalyzerConfig::default());
        let config = AnalyzerConfig::default();
        let parent = trace_line("1-parent00-bbbbbbbbbbbbbbbbbbbbbbbb", vec![]);
        let outcomes = correlator.process_line(&parent, &config);
        assert!(outcomes.is_empty());
        let leftovers = correlator.flush(&config);
        assert_eq!(leftovers.len(), 1);
        assert!(leftovers[0].is_ok());
    }

    #[test]
    fn evicting_an_unmatched_parent_analyzes_it_standalone() {
        let config = AnalyzerConfig {
            trigger_cache_capacity: 1,
            ..AnalyzerConfig::default()
        };
        let mut correlator = TriggerCorrelator::new(&config);
        let first = trace_line("1-firstone-bbbbbbbbbbbbbbbbbbbbbbbb", vec![]);
        let second = trace_line("1-secondo2-bbbbbbbbbbbbbbbbbbbbbbbb", vec![]);

        assert!(correlator.process_line(&first, &config).is_empty());
        let outcomes = correlator.process_line(&second, &config);
        // "first" is evicted to make room for "second" and analyzed standalone.
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());

        let leftovers = correlator.flush(&config);
        assert_eq!(leftovers.len(), 1);
    }
}

//! Category mapping and critical-path latency breakdown.
//!
//! Walks the critical path computed by `critical_path::analyze` and
//! classifies every interval between consecutive path segments into one of
//! a fixed set of latency categories, producing the per-trace totals that
//! become a `trace_breakdown.csv` row.

use crate::config::AnalyzerConfig;
use crate::critical_path::{self, CriticalPathResult};
use crate::error::{AnalysisError, Result};
use crate::segment::RawTrace;
use crate::span_graph::{InvocationType, NodeId, SpanGraph};
use std::collections::HashMap;

/// A latency category. Variant order matches the CSV column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Orchestration,
    Trigger,
    ContainerInitialization,
    RuntimeInitialization,
    Computation,
    Queing,
    Overhead,
    ExternalService,
    Unclassified,
}

impl Category {
    /// The CSV column name. `queing` keeps the original analyzer's spelling
    /// for byte-compatibility with existing downstream tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Orchestration => "orchestration",
            Category::Trigger => "trigger",
            Category::ContainerInitialization => "container_initialization",
            Category::RuntimeInitialization => "runtime_initialization",
            Category::Computation => "computation",
            Category::Queing => "queing",
            Category::Overhead => "overhead",
            Category::ExternalService => "external_service",
            Category::Unclassified => "unclassified",
        }
    }

    pub const ALL: [Category; 9] = [
        Category::Orchestration,
        Category::Trigger,
        Category::ContainerInitialization,
        Category::RuntimeInitialization,
        Category::Computation,
        Category::Queing,
        Category::Overhead,
        Category::ExternalService,
        Category::Unclassified,
    ];
}

/// Maps a known AWS resource `origin` string to a latency category.
/// Unrecognized origins fall back to `Unclassified`.
pub fn category_for_origin(origin: &str) -> Category {
    match origin {
        "AWS::ApiGateway::Stage"
        | "AWS::StepFunctions::StateMachine"
        | "AWS::stepfunctions"
        | "AWS::STEPFUNCTIONS" => Category::Orchestration,
        "AWS::Lambda" => Category::Orchestration,
        "AWS::Lambda::Function" => Category::Computation,
        "AWS::S3::Bucket" | "AWS::S3" => Category::ExternalService,
        "AWS::DynamoDB::Table" => Category::ExternalService,
        "AWS::SQS::Queue" => Category::ExternalService,
        "AWS::SNS" => Category::ExternalService,
        "Database::SQL" => Category::ExternalService,
        "AWS::Kinesis" => Category::ExternalService,
        "AWS::rekognition" => Category::ExternalService,
        _ => Category::Unclassified,
    }
}

/// Recursively resolves a segment's category.
///
/// A segment with its own `origin` is classified directly. Subsegments
/// (which never carry an `origin`) inherit a category from their parent,
/// with two Lambda-specific overrides baked in: the named subsegments an
/// `AWS::Lambda::Function` always emits (`Overhead`, `Invocation`,
/// `Initialization`) and the `Dwell Time` subsegment that both
/// `AWS::Lambda` and `AWS::Lambda::Function` segments can emit.
fn category_for_doc(graph: &SpanGraph, id: NodeId) -> Result<Category> {
    let doc = graph.doc(id);
    if let Some(origin) = &doc.origin {
        return Ok(category_for_origin(origin));
    }

    let parent_id = graph.parent_of(id).ok_or_else(|| {
        AnalysisError::MalformedTrace(format!(
            "segment {} has no origin and no parent to inherit a category from",
            doc.id
        ))
    })?;
    let parent_doc = graph.doc(parent_id);

    if let Some(parent_origin) = &parent_doc.origin {
        if parent_origin == "AWS::Lambda::Function" {
            return Ok(match doc.name.as_str() {
                "Overhead" => Category::Overhead,
                "Invocation" => Category::Computation,
                "Initialization" => Category::RuntimeInitialization,
                "Dwell Time" => Category::Queing,
                _ => Category::Unclassified,
            });
        }
        if parent_origin == "AWS::Lambda" && doc.name == "Dwell Time" {
            return Ok(Category::Queing);
        }
    }

    category_for_doc(graph, parent_id)
}

fn init_lambda_segment(graph: &SpanGraph, id: NodeId) -> Option<NodeId> {
    graph
        .children_of(id)
        .iter()
        .copied()
        .find(|&c| graph.doc(c).name == "Initialization")
}

fn is_cold_start_lambda_function(graph: &SpanGraph, id: NodeId) -> bool {
    graph.doc(id).origin.as_deref() == Some("AWS::Lambda::Function")
        && init_lambda_segment(graph, id).is_some()
}

fn first_parent(graph: &SpanGraph, id: NodeId) -> Result<NodeId> {
    graph.parent_of(id).ok_or_else(|| {
        AnalysisError::MalformedTrace(format!(
            "segment {} has no parent while walking the critical path",
            graph.doc(id).id
        ))
    })
}

/// How a critical-path interval relates its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Span,
    SpanParent,
    AsyncSend,
    SyncSend,
    SyncReceive,
}

/// One classified interval of the critical path.
#[derive(Debug, Clone)]
pub struct Interval {
    pub start_time: f64,
    pub end_time: f64,
    pub resource: Option<NodeId>,
    pub source: Option<NodeId>,
    pub target: Option<NodeId>,
    pub kind: IntervalKind,
    pub category: Category,
}

impl Interval {
    fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    fn span(start: f64, end: f64, resource: NodeId, category: Category) -> Self {
        Self {
            start_time: start,
            end_time: end,
            resource: Some(resource),
            source: None,
            target: None,
            kind: IntervalKind::Span,
            category,
        }
    }
}

struct PathCursor<'a> {
    path: &'a [NodeId],
    pos: usize,
}

impl<'a> PathCursor<'a> {
    fn new(path: &'a [NodeId]) -> Self {
        Self { path, pos: 0 }
    }

    fn next(&mut self) -> Option<NodeId> {
        let v = self.path.get(self.pos).copied();
        if v.is_some() {
            self.pos += 1;
        }
        v
    }

    fn peek(&self) -> Option<NodeId> {
        self.path.get(self.pos).copied()
    }
}

/// Recursively appends synchronous-return intervals while walking back up
/// through parents whose invocation was synchronous.
fn add_sync_return(graph: &SpanGraph, id: NodeId) -> Vec<Interval> {
    let mut out = Vec::new();
    if let Some(parent_id) = graph.parent_of(id) {
        if graph.invocation_type(id) == InvocationType::Sync {
            let doc = graph.doc(id);
            let parent_doc = graph.doc(parent_id);
            out.push(Interval {
                start_time: doc.end_time.unwrap_or(doc.start_time),
                end_time: parent_doc.end_time.unwrap_or(parent_doc.start_time),
                resource: Some(parent_id),
                source: Some(id),
                target: Some(parent_id),
                kind: IntervalKind::SyncReceive,
                category: category_for_doc(graph, parent_id).unwrap_or(Category::Unclassified),
            });
            out.extend(add_sync_return(graph, parent_id));
        }
    }
    out
}

/// Returns the critical sub-path between a pair of consecutive longest-path
/// nodes, possibly consuming additional nodes from `cursor` when a
/// cold-start Lambda invocation requires special handling of its
/// initialization subsegment.
fn pair_path(
    graph: &SpanGraph,
    cursor: &mut PathCursor,
    node: NodeId,
    next: NodeId,
    num_cold_starts: &mut usize,
    config: &AnalyzerConfig,
) -> Result<Vec<Interval>> {
    let mut out = Vec::new();
    let doc = graph.doc(node);
    let next_doc = graph.doc(next);

    if is_cold_start_lambda_function(graph, next) {
        *num_cold_starts += 1;
        let init_id = init_lambda_segment(graph, next)
            .expect("is_cold_start_lambda_function guarantees an Initialization subsegment");
        let init_doc = graph.doc(init_id);

        // Implicit container init: gap between the invoking span and the
        // Initialization subsegment actually starting.
        out.push(Interval {
            start_time: doc.start_time,
            end_time: init_doc.start_time,
            resource: Some(node),
            source: None,
            target: None,
            kind: IntervalKind::SpanParent,
            category: Category::ContainerInitialization,
        });
        // Runtime init span itself.
        out.push(Interval {
            start_time: init_doc.start_time,
            end_time: init_doc.end_time.unwrap_or(init_doc.start_time),
            resource: Some(init_id),
            source: None,
            target: None,
            kind: IntervalKind::Span,
            category: Category::RuntimeInitialization,
        });
        // Transition from runtime init back into the invoking span's category.
        out.push(Interval {
            start_time: init_doc.end_time.unwrap_or(init_doc.start_time),
            end_time: next_doc.start_time,
            resource: Some(node),
            source: Some(init_id),
            target: Some(next),
            kind: IntervalKind::SpanParent,
            category: category_for_doc(graph, node)?,
        });

        // The Lambda function segment and its Initialization subsegment are
        // already accounted for above; skip over them in the path.
        let _ = cursor.next();
        let _ = cursor.next();
        let post_init = cursor.peek();

        match post_init {
            Some(post_init_id) => {
                out.extend(pair_path(
                    graph,
                    cursor,
                    next,
                    post_init_id,
                    num_cold_starts,
                    config,
                )?);
            }
            None => {
                out.push(Interval::span(
                    next_doc.start_time,
                    next_doc.end_time.unwrap_or(next_doc.start_time),
                    next,
                    category_for_doc(graph, next)?,
                ));
                let mut current_id = next;
                let mut parent_id = first_parent(graph, current_id)?;
                let mut parent_doc = graph.doc(parent_id);
                while parent_doc.end_time.unwrap_or(parent_doc.start_time)
                    >= graph.doc(current_id).end_time.unwrap_or(graph.doc(current_id).start_time)
                {
                    let current_doc = graph.doc(current_id);
                    out.push(Interval {
                        start_time: current_doc.end_time.unwrap_or(current_doc.start_time),
                        end_time: parent_doc.end_time.unwrap_or(parent_doc.start_time),
                        resource: Some(parent_id),
                        source: Some(current_id),
                        target: Some(parent_id),
                        kind: IntervalKind::SyncReceive,
                        category: category_for_doc(graph, parent_id)?,
                    });
                    current_id = parent_id;
                    match graph.parent_of(current_id) {
                        Some(p) => {
                            parent_id = p;
                            parent_doc = graph.doc(parent_id);
                        }
                        None => break,
                    }
                }
            }
        }
    } else if graph.invocation_type(next) == InvocationType::Async {
        let latest_start = doc.start_time;
        let doc_end = doc.end_time.unwrap_or(doc.start_time);
        let early_end = doc_end.min(next_doc.start_time);

        out.push(Interval::span(
            latest_start,
            early_end,
            node,
            category_for_doc(graph, node)?,
        ));

        let threshold = config.timestamp_threshold.as_secs_f64();
        if next_doc.start_time - doc.start_time + threshold < 0.0 {
            return Err(AnalysisError::NegativeTimeDifference {
                current: doc.id.clone(),
                next: next_doc.id.clone(),
            });
        }

        out.push(Interval {
            start_time: early_end,
            end_time: next_doc.start_time,
            resource: None,
            source: Some(node),
            target: Some(next),
            kind: IntervalKind::AsyncSend,
            category: Category::Trigger,
        });
    } else if critical_path::is_parent(graph, node, next) {
        out.push(Interval {
            start_time: doc.start_time,
            end_time: next_doc.start_time,
            resource: Some(node),
            source: Some(node),
            target: Some(next),
            kind: IntervalKind::SyncSend,
            category: category_for_doc(graph, node)?,
        });
    } else {
        out.push(Interval::span(
            doc.start_time,
            doc.end_time.unwrap_or(doc.start_time),
            node,
            category_for_doc(graph, node)?,
        ));

        let mut current_id = node;
        let mut parent_id = first_parent(graph, current_id)?;
        let mut parent_doc = graph.doc(parent_id);
        while parent_doc.end_time.unwrap_or(parent_doc.start_time) <= next_doc.start_time {
            let current_doc = graph.doc(current_id);
            out.push(Interval {
                start_time: current_doc.end_time.unwrap_or(current_doc.start_time),
                end_time: parent_doc.end_time.unwrap_or(parent_doc.start_time),
                resource: Some(parent_id),
                source: Some(current_id),
                target: Some(parent_id),
                kind: IntervalKind::SyncReceive,
                category: category_for_doc(graph, parent_id)?,
            });
            current_id = parent_id;
            parent_id = first_parent(graph, current_id)?;
            parent_doc = graph.doc(parent_id);
        }

        let final_parent = first_parent(graph, next)?;
        let current_doc = graph.doc(current_id);
        out.push(Interval {
            start_time: current_doc.end_time.unwrap_or(current_doc.start_time),
            end_time: next_doc.start_time,
            resource: Some(final_parent),
            source: Some(current_id),
            target: Some(next),
            kind: IntervalKind::SpanParent,
            category: category_for_doc(graph, final_parent)?,
        });
    }

    Ok(out)
}

/// The fully classified critical-path breakdown of a trace.
pub struct BreakdownResult {
    pub num_cold_starts: usize,
    pub longest_path_names: Vec<String>,
    pub longest_path_arns: Vec<String>,
    pub category_totals: HashMap<&'static str, f64>,
    pub intervals: Vec<Interval>,
}

/// Walks the critical path and classifies every interval, validating the
/// global invariants (durations sum to the trace duration, the number of
/// detected cold starts matches the number of `Initialization` segments on
/// the path).
pub fn calculate_breakdown(
    graph: &SpanGraph,
    critical: &CriticalPathResult,
    config: &AnalyzerConfig,
) -> Result<BreakdownResult> {
    let mut num_cold_starts = 0usize;
    let path = &critical.longest_path;
    let mut cursor = PathCursor::new(path);
    let mut intervals: Vec<Interval> = Vec::new();

    while let Some(id) = cursor.next() {
        let doc = graph.doc(id);
        match cursor.peek() {
            Some(next_id) => {
                intervals.extend(pair_path(
                    graph,
                    &mut cursor,
                    id,
                    next_id,
                    &mut num_cold_starts,
                    config,
                )?);
            }
            None => {
                intervals.push(Interval::span(
                    doc.start_time,
                    doc.end_time.unwrap_or(doc.start_time),
                    id,
                    category_for_doc(graph, id)?,
                ));
                intervals.extend(add_sync_return(graph, id));
            }
        }
    }

    let mut longest_path_names = Vec::new();
    let mut longest_path_arns = Vec::new();
    for &id in path {
        let doc = graph.doc(id);
        longest_path_names.push(doc.name.clone());
        if let Some(arn) = &doc.resource_arn {
            longest_path_arns.push(arn.clone());
        }
    }

    let mut category_totals: HashMap<&'static str, f64> = HashMap::new();
    category_totals.insert(Category::Unclassified.as_str(), 0.0);

    let mut curr_duration = 0.0f64;
    let margin = config.timestamp_margin.as_secs_f64();
    for interval in &intervals {
        *category_totals
            .entry(interval.category.as_str())
            .or_insert(0.0) += interval.duration();
        curr_duration += interval.duration();
        let expected = interval.end_time - graph.start_time;
        if (curr_duration - expected).abs() > margin {
            return Err(AnalysisError::InvariantViolation {
                declared: format!("{curr_duration}"),
                calculated: format!("{expected}"),
            });
        }
    }

    let last = intervals
        .last()
        .ok_or_else(|| AnalysisError::MalformedTrace("empty critical path".to_string()))?;
    let cp_last_target = last.target;
    let end_matches_target = cp_last_target == Some(graph.end)
        || cp_last_target == Some(graph.start)
        || cp_last_target
            .map(|t| {
                let d = graph.doc(t);
                d.end_time.unwrap_or(d.start_time) == graph.end_time
            })
            .unwrap_or(false);
    if !end_matches_target {
        return Err(AnalysisError::InvariantViolation {
            declared: format!("{:?}", graph.end),
            calculated: format!("{cp_last_target:?}"),
        });
    }

    if (graph.duration - curr_duration).abs() >= config.timestamp_margin.as_secs_f64() {
        return Err(AnalysisError::InvariantViolation {
            declared: format!("{}", graph.duration),
            calculated: format!("{curr_duration}"),
        });
    }

    let num_init_segments = longest_path_names
        .iter()
        .filter(|n| n.as_str() == "Initialization")
        .count();
    if num_cold_starts != num_init_segments {
        return Err(AnalysisError::InvariantViolation {
            declared: format!("{num_cold_starts} cold starts"),
            calculated: format!("{num_init_segments} initialization segments"),
        });
    }

    Ok(BreakdownResult {
        num_cold_starts,
        longest_path_names,
        longest_path_arns,
        category_totals,
        intervals,
    })
}

/// End-to-end: builds the span graph, computes the critical path, and
/// classifies the breakdown for a single trace document.
pub fn extract_trace_breakdown(
    trace: &RawTrace,
    config: &AnalyzerConfig,
) -> Result<(SpanGraph, CriticalPathResult, BreakdownResult)> {
    let graph = SpanGraph::build(trace, config)?;
    let critical = critical_path::analyze(&graph, config)?;
    let breakdown = calculate_breakdown(&graph, &critical, config)?;
    Ok((graph, critical, breakdown))
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

    fn trace(duration: f64, docs: Vec<&str>) -> RawTrace {
        RawTrace {
            id: "1-abc".to_string(),
            duration: Some(duration),
            limit_exceeded: Some(false),
            segments: docs.into_iter().map(wrapper).collect(),
        }
    }

    #[test]
    fn category_for_origin_maps_known_services() {
        assert!(matches!(
            category_for_origin("AWS::Lambda::Function"),
            Category::Computation
        ));
        assert!(matches!(
            category_for_origin("AWS::S3::Bucket"),
            Category::ExternalService
        ));
        assert!(matches!(
            category_for_origin("something-custom"),
            Category::Unclassified
        ));
    }

    #[test]
    fn single_span_trace_is_fully_classified() {
        let t = trace(
            1.0,
            vec![r#"{"id":"a","name":"root","origin":"AWS::ApiGateway::Stage","start_time":0.0,"end_time":1.0}"#],
        );
        let config = AnalyzerConfig::default();
        let (_, _, result) = extract_trace_breakdown(&t, &config).unwrap();
        assert_eq!(result.num_cold_starts, 0);
        assert_eq!(
            *result.category_totals.get("orchestration").unwrap(),
            1.0
        );
        assert_eq!(*result.category_totals.get("unclassified").unwrap(), 0.0);
    }

    #[test]
    fn cold_start_lambda_increments_counter() {
        let t = trace(
            1.0,
            vec![
                r#"{"id":"a","name":"root","origin":"AWS::Lambda","start_time":0.0,"end_time":1.0}"#,
                r#"{"id":"b","name":"fn","origin":"AWS::Lambda::Function","parent_id":"a","start_time":0.0,"end_time":1.0,
                    "subsegments":[{"id":"i","name":"Initialization","start_time":0.0,"end_time":0.2},
                                   {"id":"v","name":"Invocation","start_time":0.2,"end_time":1.0}]}"#,
            ],
        );
        let config = AnalyzerConfig::default();
        let (_, _, result) = extract_trace_breakdown(&t, &config).unwrap();
        assert_eq!(result.num_cold_starts, 1);
        assert!(result.category_totals.contains_key("runtime_initialization"));
        assert!(result.category_totals.contains_key("container_initialization"));
    }
}

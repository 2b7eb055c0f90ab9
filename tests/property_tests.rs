//! Property-based tests for the quantified invariants over span graphs and
//! critical-path breakdowns: critical-path duration conservation, causal
//! ordering of parent/child start times, monotonicity of the async-call
//! heuristic in the clock-skew margin, and totality of the origin-to-category
//! map.

use proptest::prelude::*;
use std::time::Duration;
use trace_breakdown::breakdown::{category_for_origin, extract_trace_breakdown, Category};
use trace_breakdown::config::AnalyzerConfig;
use trace_breakdown::segment::{RawSegment, RawTrace, SegmentWrapper};
use trace_breakdown::span_graph::{is_async_call, InvocationType, NodeId, SpanGraph};

fn wrapper(doc: String) -> SegmentWrapper {
    SegmentWrapper {
        id: None,
        document: doc,
    }
}

fn trace(duration: f64, docs: Vec<String>) -> RawTrace {
    RawTrace {
        id: "1-prop".to_string(),
        duration: Some(duration),
        limit_exceeded: Some(false),
        segments: docs.into_iter().map(wrapper).collect(),
    }
}

/// Builds a flat one-level trace: a root spanning `[0, total]` plus one
/// child per sorted, deduplicated, non-overlapping fraction pair. Children
/// are always contained in the root's interval and strictly ordered, so the
/// async heuristic never fires (the root always ends at or after every
/// child), keeping every invocation classified `Sync`.
fn flat_trace(total: f64, mut fracs: Vec<f64>) -> RawTrace {
    fracs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    fracs.dedup();
    if fracs.len() % 2 == 1 {
        fracs.pop();
    }
    let mut docs = vec![format!(
        r#"{{"id":"root","name":"root","origin":"AWS::ApiGateway::Stage","start_time":0.0,"end_time":{total}}}"#
    )];
    for (i, pair) in fracs.chunks(2).enumerate() {
        let (start, end) = (pair[0] * total, pair[1] * total);
        docs.push(format!(
            r#"{{"id":"child{i}","name":"child","parent_id":"root","start_time":{start},"end_time":{end}}}"#
        ));
    }
    trace(total, docs)
}

fn seg(id: &str, start_time: f64, end_time: Option<f64>) -> RawSegment {
    RawSegment {
        id: id.to_string(),
        name: id.to_string(),
        start_time,
        end_time,
        in_progress: false,
        error: false,
        fault: false,
        throttle: false,
        origin: None,
        parent_id: None,
        resource_arn: None,
        http: None,
        subsegments: vec![],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant (1): the critical-path breakdown's category totals sum to
    /// the trace's declared duration, within the configured margin.
    #[test]
    fn prop_breakdown_totals_sum_to_trace_duration(
        total in 2.0f64..50.0,
        fracs in prop::collection::vec(0.001f64..0.999, 0..=6),
    ) {
        let t = flat_trace(total, fracs);
        let config = AnalyzerConfig::default();
        if let Ok((graph, _critical, breakdown)) = extract_trace_breakdown(&t, &config) {
            let sum: f64 = breakdown.category_totals.values().sum();
            let margin = config.timestamp_margin.as_secs_f64();
            prop_assert!((sum - graph.duration).abs() <= margin + 1e-9);
        }
    }

    /// Invariant (3): every non-root node's start time is at or after its
    /// parent's start time, unless the invocation is classified async.
    #[test]
    fn prop_child_starts_after_parent_or_is_async(
        total in 2.0f64..50.0,
        fracs in prop::collection::vec(0.001f64..0.999, 0..=6),
    ) {
        let t = flat_trace(total, fracs);
        let config = AnalyzerConfig::default();
        if let Ok(graph) = SpanGraph::build(&t, &config) {
            for idx in 0..graph.node_count() {
                let id = NodeId(idx as u32);
                if let Some(parent_id) = graph.parent_of(id) {
                    let ordered =
                        graph.doc(id).start_time >= graph.doc(parent_id).start_time;
                    let async_call = graph.invocation_type(id) == InvocationType::Async;
                    prop_assert!(ordered || async_call);
                }
            }
        }
    }

    /// Invariant (4): the async-call heuristic is monotone in the margin —
    /// a parent/child pair classified async at a larger margin is still
    /// classified async at any smaller margin, since shrinking the margin
    /// only makes the "ends well before its parent" condition easier to
    /// satisfy.
    #[test]
    fn prop_async_classification_monotone_in_margin(
        parent_end in -1000.0f64..1000.0,
        child_end in -1000.0f64..1000.0,
        margin_small_us in 0u64..5_000,
        margin_extra_us in 0u64..5_000,
    ) {
        let parent = seg("p", 0.0, Some(parent_end));
        let child = seg("c", 0.0, Some(child_end));

        let mut cfg_small = AnalyzerConfig::default();
        cfg_small.timestamp_margin = Duration::from_micros(margin_small_us);
        let mut cfg_large = AnalyzerConfig::default();
        cfg_large.timestamp_margin = Duration::from_micros(margin_small_us + margin_extra_us);

        if is_async_call(&parent, &child, &cfg_large) {
            prop_assert!(is_async_call(&parent, &child, &cfg_small));
        }
    }

    /// Invariant (5): the origin-to-category map is total — every origin
    /// string maps to some category, and any string outside the known set
    /// of AWS resource origins flows to `Unclassified`.
    #[test]
    fn prop_category_map_is_total(origin in "[A-Za-z:]{0,40}") {
        const KNOWN: &[&str] = &[
            "AWS::ApiGateway::Stage",
            "AWS::StepFunctions::StateMachine",
            "AWS::stepfunctions",
            "AWS::STEPFUNCTIONS",
            "AWS::Lambda",
            "AWS::Lambda::Function",
            "AWS::S3::Bucket",
            "AWS::S3",
            "AWS::DynamoDB::Table",
            "AWS::SQS::Queue",
            "AWS::SNS",
            "Database::SQL",
            "AWS::Kinesis",
            "AWS::rekognition",
        ];
        let category = category_for_origin(&origin);
        if !KNOWN.contains(&origin.as_str()) {
            prop_assert_eq!(category, Category::Unclassified);
        }
    }
}

#[cfg(test)]
mod deterministic {
    use super::*;

    #[test]
    fn known_origin_is_never_unclassified() {
        assert_eq!(
            category_for_origin("AWS::Lambda::Function"),
            Category::Computation
        );
        assert_ne!(
            category_for_origin("AWS::ApiGateway::Stage"),
            Category::Unclassified
        );
    }
}

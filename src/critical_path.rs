//! Call-stack reconstruction and critical-path (longest-path) analysis.
//!
//! Implementation based on Qiu et al. (2020), "FIRM: An Intelligent
//! Fine-grained Resource Management Framework for SLO-Oriented
//! Microservices" (OSDI'20) — with one correction: the paper's pseudocode
//! appends the current node to the path before the children loop, which
//! produces the wrong order; this implementation appends after, matching
//! what the original analyzer's authors found necessary in practice.

use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Result};
use crate::span_graph::{is_async_call, NodeId, SpanGraph};

/// A defensive bound on recursion depth. A real trace's call depth is
/// bounded by the number of network hops an application makes; anything
/// beyond this points at a malformed or cyclic graph rather than legitimate
/// depth.
const MAX_PATH_DEPTH: usize = 10_000;

pub struct CriticalPathResult {
    /// The asynchronous call stack, from the globally-last-ending segment
    /// back up to (but excluding) a point where no further parent exists.
    pub call_stack: Vec<NodeId>,
    /// The critical path: node ids from the trace root to wherever the
    /// longest chain of causally-connected work ends.
    pub longest_path: Vec<NodeId>,
}

/// Returns the asynchronous call stack without the root, walking up parents
/// from `end`.
pub fn call_stack(graph: &SpanGraph, end: NodeId) -> Result<Vec<NodeId>> {
    let mut stack = Vec::new();
    let mut node = Some(end);
    while let Some(n) = node {
        if stack.contains(&n) {
            return Err(AnalysisError::InfiniteLoop(graph.doc(n).id.clone()));
        }
        stack.push(n);
        node = graph.parent_of(n);
    }
    Ok(stack)
}

/// Returns children sorted ascending by (end_time, start_time).
///
/// The secondary sort key resolves cases where two consecutive children
/// share an end_time (zero-duration segment) but one clearly happened
/// earlier by virtue of an earlier start_time: `start1<end1=start2=end2`.
pub fn get_sorted_children(graph: &SpanGraph, node: NodeId) -> Vec<NodeId> {
    let mut children = graph.children_of(node).to_vec();
    children.sort_by(|&a, &b| {
        let da = graph.doc(a);
        let db = graph.doc(b);
        let ea = da.end_time.unwrap_or(da.start_time);
        let eb = db.end_time.unwrap_or(db.start_time);
        ea.partial_cmp(&eb)
            .unwrap()
            .then(da.start_time.partial_cmp(&db.start_time).unwrap())
    });
    children
}

/// Returns true if `first` happens before `second` in sequential order.
pub fn happens_before(graph: &SpanGraph, first: NodeId, second: NodeId) -> bool {
    let first_doc = graph.doc(first);
    let second_doc = graph.doc(second);
    first_doc.end_time.unwrap_or(first_doc.start_time) <= second_doc.start_time
}

/// Returns true if `candidate_parent` is the direct parent of `node`.
pub fn is_parent(graph: &SpanGraph, candidate_parent: NodeId, node: NodeId) -> bool {
    graph.parent_of(node) == Some(candidate_parent)
}

fn longest_path_rec(
    graph: &SpanGraph,
    node: NodeId,
    stack: &mut Vec<NodeId>,
    depth: usize,
    config: &AnalyzerConfig,
) -> Result<Vec<NodeId>> {
    if depth > MAX_PATH_DEPTH {
        return Err(AnalysisError::InfiniteLoop(graph.doc(node).id.clone()));
    }

    let mut path = vec![node];
    if graph.children_of(node).is_empty() {
        return Ok(path);
    }

    if stack.last() == Some(&node) {
        stack.pop();
    }

    let sorted_children = get_sorted_children(graph, node);
    let last_returning_child = *sorted_children
        .last()
        .expect("non-empty children list has a last element");

    for &child in &sorted_children {
        if happens_before(graph, child, last_returning_child) {
            let last_doc = graph.doc(*path.last().unwrap());
            let parent_doc = graph.doc(node);
            let last_end = last_doc.end_time.unwrap_or(last_doc.start_time);
            let parent_end = parent_doc.end_time.unwrap_or(parent_doc.start_time);
            if last_end <= parent_end {
                path.extend(longest_path_rec(graph, child, stack, depth + 1, config)?);
            }
        }
    }

    let parent_doc = graph.doc(node);
    let child_doc = graph.doc(last_returning_child);
    if is_async_call(parent_doc, child_doc, config) {
        // Only follow asynchronous branches that are connected to the
        // globally-last-ending segment via the call stack.
        if stack.last() == Some(&last_returning_child) {
            path.extend(longest_path_rec(
                graph,
                last_returning_child,
                stack,
                depth + 1,
                config,
            )?);
        }
    } else {
        let last_doc = graph.doc(*path.last().unwrap());
        let last_end = last_doc.end_time.unwrap_or(last_doc.start_time);
        let parent_end = parent_doc.end_time.unwrap_or(parent_doc.start_time);
        if last_end <= parent_end {
            path.extend(longest_path_rec(
                graph,
                last_returning_child,
                stack,
                depth + 1,
                config,
            )?);
        }
    }

    Ok(path)
}

/// Computes the call stack and critical path for a validated span graph.
pub fn analyze(graph: &SpanGraph, config: &AnalyzerConfig) -> Result<CriticalPathResult> {
    let call_stack = call_stack(graph, graph.end)?;
    let mut stack = call_stack.clone();
    let longest_path = longest_path_rec(graph, graph.start, &mut stack, 0, config)?;
    Ok(CriticalPathResult {
        call_stack,
        longest_path,
    })
}

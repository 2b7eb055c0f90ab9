//! Span graph construction from a single trace document.
//!
//! Each segment (or subsegment) becomes a node; edges encode parent/child
//! causality. Unlike a general-purpose graph library this is a flat arena
//! indexed by `NodeId` — traces rarely exceed a few hundred segments, and an
//! arena keeps construction and traversal to plain `Vec` indexing with no
//! pointer chasing or reference-counting overhead.
//!
//! # Architecture
//!
//! ```text
//! RawTrace { Segments: [ Document: "{...}" ] }
//!                  │ parse_trace_segments()
//!                  ▼
//! SpanGraph::build()
//!   nodes:    [ seg_a, seg_b, seg_c, ... ]   (indexed by NodeId)
//!   parent:   [ None,  Some(0), Some(0) ]
//!   children: [ [1, 2], [], [] ]
//! ```

use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Result};
use crate::segment::{parse_trace_segments, RawSegment, RawTrace};
use std::collections::HashMap;

/// Index into a `SpanGraph`'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// How a segment was invoked by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Root segment: invoked directly by the client, no parent in this trace.
    Client,
    Sync,
    Async,
}

/// Heuristic to identify obvious asynchronous invocations.
///
/// This might miss async calls that end before their parent because it is
/// impossible to detect from traces alone (see Qiu et al., FIRM, OSDI'20).
/// Hence synchronous invocations cannot be reliably identified either —
/// this only flags the *obvious* async cases.
///
/// `AWS::Lambda => AWS::Lambda::Function` is always treated as synchronous:
/// those two segment kinds use different timestamp precision (ms vs µs) and
/// without this exception a purely clock-skew-induced gap would prematurely
/// truncate the longest path.
pub fn is_async_call(parent: &RawSegment, child: &RawSegment, config: &AnalyzerConfig) -> bool {
    if child.origin.as_deref() == Some("AWS::Lambda::Function") {
        return false;
    }
    let margin = config.timestamp_margin.as_secs_f64();
    parent.end_time.unwrap_or(parent.start_time) - child.end_time.unwrap_or(child.start_time) + margin < 0.0
}

struct Builder {
    docs: Vec<Option<RawSegment>>,
    is_subsegment: Vec<bool>,
    id_to_node: HashMap<String, NodeId>,
    parent: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
    root: Option<NodeId>,
}

impl Builder {
    fn new() -> Self {
        Self {
            docs: Vec::new(),
            is_subsegment: Vec::new(),
            id_to_node: HashMap::new(),
            parent: Vec::new(),
            children: Vec::new(),
            root: None,
        }
    }

    fn get_or_create(&mut self, id: &str) -> NodeId {
        if let Some(&n) = self.id_to_node.get(id) {
            return n;
        }
        let n = NodeId(self.docs.len() as u32);
        self.docs.push(None);
        self.is_subsegment.push(false);
        self.parent.push(None);
        self.children.push(Vec::new());
        self.id_to_node.insert(id.to_string(), n);
        n
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.parent[child.0 as usize] = Some(parent);
        self.children[parent.0 as usize].push(child);
    }

    fn insert_subsegment_recursive(&mut self, seg: RawSegment, parent: NodeId) -> Result<NodeId> {
        if seg.in_progress || seg.end_time.is_none() {
            return Err(AnalysisError::InProgressSegment(format!(
                "subsegment {}",
                seg.id
            )));
        }
        let node = self.get_or_create(&seg.id);
        self.is_subsegment[node.0 as usize] = true;
        self.link(parent, node);
        let subsegments = seg.subsegments.clone();
        self.docs[node.0 as usize] = Some(seg);
        for sub in subsegments {
            self.insert_subsegment_recursive(sub, node)?;
        }
        Ok(node)
    }

    fn insert_top_level(&mut self, seg: RawSegment) -> Result<()> {
        if seg.in_progress || seg.end_time.is_none() {
            return Err(AnalysisError::InProgressSegment(format!(
                "segment {}",
                seg.id
            )));
        }
        let node = self.get_or_create(&seg.id);
        self.is_subsegment[node.0 as usize] = false;
        let parent_id = seg.parent_id.clone();
        let subsegments = seg.subsegments.clone();
        self.docs[node.0 as usize] = Some(seg);
        match parent_id {
            Some(pid) => {
                let parent_node = self.get_or_create(&pid);
                self.link(parent_node, node);
            }
            // Special case of missing root: the segment with the root might be missing.
            // Overwritten by every top-level segment lacking a parent_id; last one wins.
            None => self.root = Some(node),
        }
        for sub in subsegments {
            self.insert_subsegment_recursive(sub, node)?;
        }
        Ok(())
    }
}

/// A trace reconstructed as a directed acyclic graph of spans.
pub struct SpanGraph {
    nodes: Vec<RawSegment>,
    is_subsegment: Vec<bool>,
    invocation_type: Vec<InvocationType>,
    parent: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,

    pub trace_id: String,
    pub duration: f64,
    pub limit_exceeded: bool,
    pub url: Option<String>,
    pub services: Vec<String>,
    pub errors: usize,
    pub faults: usize,
    pub throttles: usize,

    pub root: NodeId,
    pub start: NodeId,
    pub start_time: f64,
    pub end: NodeId,
    pub end_time: f64,
}

impl SpanGraph {
    /// Builds and validates a span graph from a single trace document.
    pub fn build(trace: &RawTrace, config: &AnalyzerConfig) -> Result<Self> {
        let duration = trace.duration.ok_or(AnalysisError::MissingDuration)?;
        let segments = parse_trace_segments(trace)?;

        let mut builder = Builder::new();
        for seg in segments {
            builder.insert_top_level(seg)?;
        }

        let trace_id = trace.id.clone();

        // Every referenced id must have been defined by some segment document.
        for (idx, doc) in builder.docs.iter().enumerate() {
            if doc.is_none() {
                let missing_id = builder
                    .id_to_node
                    .iter()
                    .find(|(_, v)| v.0 as usize == idx)
                    .map(|(k, _)| k.clone())
                    .unwrap_or_default();
                return Err(AnalysisError::IncompleteGraph {
                    trace_id,
                    missing_id,
                });
            }
        }

        let root = builder.root.ok_or(AnalysisError::MissingRoot)?;

        let nodes: Vec<RawSegment> = builder.docs.into_iter().map(|d| d.unwrap()).collect();
        let n = nodes.len();
        let mut invocation_type = vec![InvocationType::Client; n];
        let mut url = None;
        let mut services = Vec::new();
        let mut errors = 0usize;
        let mut faults = 0usize;
        let mut throttles = 0usize;
        let mut start = NodeId(0);
        let mut start_time: Option<f64> = None;
        let mut end = NodeId(0);
        let mut end_time: Option<f64> = None;

        for idx in 0..n {
            let id = NodeId(idx as u32);
            let doc = &nodes[idx];
            match builder.parent[idx] {
                Some(parent_id) => {
                    let parent_doc = &nodes[parent_id.0 as usize];
                    invocation_type[idx] = if is_async_call(parent_doc, doc, config) {
                        InvocationType::Async
                    } else {
                        InvocationType::Sync
                    };
                }
                None => invocation_type[idx] = InvocationType::Client,
            }

            if start_time.is_none() || doc.start_time < start_time.unwrap() {
                start_time = Some(doc.start_time);
                start = id;
            }
            let doc_end = doc.end_time.unwrap_or(doc.start_time);
            if end_time.is_none() || doc_end > end_time.unwrap() {
                end_time = Some(doc_end);
                end = id;
            }

            if let Some(origin) = &doc.origin {
                services.push(origin.clone());
                if origin == "AWS::ApiGateway::Stage" {
                    url = doc
                        .http
                        .as_ref()
                        .and_then(|h| h.pointer("/request/url"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                }
            }
            if doc.error {
                errors += 1;
            }
            if doc.fault {
                faults += 1;
            }
            if doc.throttle {
                throttles += 1;
            }
        }

        let start_time = start_time.expect("non-empty graph has a start time");
        let end_time = end_time.expect("non-empty graph has an end time");

        if root != start {
            return Err(AnalysisError::ClockMismatch {
                declared: nodes[root.0 as usize].id.clone(),
                calculated: nodes[start.0 as usize].id.clone(),
            });
        }

        let margin = config.timestamp_margin.as_secs_f64();
        let calculated = end_time - start_time;
        if (duration - calculated).abs() > margin {
            return Err(AnalysisError::ClockMismatch {
                declared: format!("{duration}"),
                calculated: format!("{calculated}"),
            });
        }

        Ok(Self {
            nodes,
            is_subsegment: builder.is_subsegment,
            invocation_type,
            parent: builder.parent,
            children: builder.children,
            trace_id: trace.id.clone(),
            duration,
            limit_exceeded: trace.limit_exceeded.unwrap_or(false),
            url,
            services,
            errors,
            faults,
            throttles,
            root,
            start,
            start_time,
            end,
            end_time,
        })
    }

    pub fn doc(&self, id: NodeId) -> &RawSegment {
        &self.nodes[id.0 as usize]
    }

    pub fn is_subsegment(&self, id: NodeId) -> bool {
        self.is_subsegment[id.0 as usize]
    }

    pub fn invocation_type(&self, id: NodeId) -> InvocationType {
        self.invocation_type[id.0 as usize]
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.parent[id.0 as usize]
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.children[id.0 as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

//! Wire types for X-Ray-style trace documents, and the JSONL trace source.
//!
//! A trace document wraps a flat list of top-level segments. Each segment is
//! itself double JSON-encoded: `Segments[i].Document` is a JSON *string*
//! that must be parsed again to get at `start_time`/`end_time`/`origin`/etc.
//! Subsegments, by contrast, are nested directly as JSON objects once the
//! document string has been parsed.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::Path;

/// A trace as it comes off the wire: an id, a total duration, and a flat
/// list of segment wrappers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTrace {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Duration")]
    pub duration: Option<f64>,
    #[serde(rename = "LimitExceeded")]
    pub limit_exceeded: Option<bool>,
    #[serde(rename = "Segments")]
    pub segments: Vec<SegmentWrapper>,
}

/// A single top-level segment, still JSON-encoded in `document`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentWrapper {
    #[serde(rename = "Id")]
    pub id: Option<String>,
    #[serde(rename = "Document")]
    pub document: String,
}

/// A parsed segment or subsegment document.
///
/// Unknown fields on the wire format are not modeled individually; instead
/// `origin_class()` classifies the known shapes this crate's category
/// mapping cares about, leaving anything else as `OriginClass::Other`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSegment {
    pub id: String,
    pub name: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub fault: bool,
    #[serde(default)]
    pub throttle: bool,
    pub origin: Option<String>,
    pub parent_id: Option<String>,
    pub resource_arn: Option<String>,
    pub http: Option<serde_json::Value>,
    #[serde(default)]
    pub subsegments: Vec<RawSegment>,
}

/// Classification of a segment's `origin` string, used by the category
/// mapping in `breakdown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginClass {
    ApiGatewayStage,
    StepFunctions,
    LambdaOrchestration,
    LambdaFunction,
    S3,
    DynamoDb,
    Sqs,
    Sns,
    Sql,
    Kinesis,
    Rekognition,
    Other(String),
    None,
}

impl RawSegment {
    pub fn origin_class(&self) -> OriginClass {
        match self.origin.as_deref() {
            Some("AWS::ApiGateway::Stage") => OriginClass::ApiGatewayStage,
            Some("AWS::StepFunctions::StateMachine")
            | Some("AWS::stepfunctions")
            | Some("AWS::STEPFUNCTIONS") => OriginClass::StepFunctions,
            Some("AWS::Lambda") => OriginClass::LambdaOrchestration,
            Some("AWS::Lambda::Function") => OriginClass::LambdaFunction,
            Some("AWS::S3::Bucket") | Some("AWS::S3") => OriginClass::S3,
            Some("AWS::DynamoDB::Table") => OriginClass::DynamoDb,
            Some("AWS::SQS::Queue") => OriginClass::Sqs,
            Some("AWS::SNS") => OriginClass::Sns,
            Some("Database::SQL") => OriginClass::Sql,
            Some("AWS::Kinesis") => OriginClass::Kinesis,
            Some("AWS::rekognition") => OriginClass::Rekognition,
            Some(other) => OriginClass::Other(other.to_string()),
            None => OriginClass::None,
        }
    }
}

/// Parses the (possibly nested) list of top-level segments of a trace.
pub fn parse_trace_segments(trace: &RawTrace) -> Result<Vec<RawSegment>> {
    trace
        .segments
        .iter()
        .map(|wrapper| serde_json::from_str(&wrapper.document).map_err(AnalysisError::from))
        .collect()
}

/// Lazily reads one JSON trace document per line.
///
/// Non-restartable: it reads through `BufRead` once, from front to back,
/// same as the Python analyzer's plain `for line in traces_json` loop.
pub struct JsonlTraceReader<R: BufRead> {
    lines: std::io::Lines<R>,
}

impl<R: BufRead> JsonlTraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for JsonlTraceReader<R> {
    type Item = (String, Result<RawTrace>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(_) => continue,
            };
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<RawTrace>(&line).map_err(AnalysisError::from);
            return Some((line, parsed));
        }
    }
}

/// Rewrites a legacy trace log (a single JSON object mapping trace id to
/// trace document) into one-trace-per-line JSONL.
///
/// When `replace` is set, the original file is atomically replaced with the
/// migrated one; otherwise the migrated file is written alongside it with a
/// `.jsonl` suffix.
pub fn migrate_legacy_to_jsonl(traces_path: &Path, replace: bool) -> anyhow::Result<std::path::PathBuf> {
    let contents = std::fs::read_to_string(traces_path)?;
    let traces: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&contents)?;

    let target = traces_path.with_extension("jsonl");
    let mut out = std::fs::File::create(&target)?;
    for trace in traces.values() {
        writeln!(out, "{}", serde_json::to_string(trace)?)?;
    }
    out.flush()?;

    if replace {
        std::fs::rename(&target, traces_path)?;
        return Ok(traces_path.to_path_buf());
    }
    Ok(target)
}

//! Error taxonomy for trace analysis.
//!
//! Every variant here is a *local* failure: one malformed or inconsistent
//! trace, isolated so the batch driver can log it and move on. I/O failures
//! that should abort the whole batch are handled at the driver/CLI boundary
//! with `anyhow` instead.

use thiserror::Error;

/// Errors raised while parsing or analyzing a single trace.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("missing trace duration")]
    MissingDuration,

    #[error("segment {0} in progress")]
    InProgressSegment(String),

    #[error("incomplete trace {trace_id}: segment {missing_id} is referenced but was never defined")]
    IncompleteGraph { trace_id: String, missing_id: String },

    #[error("logical root node missing")]
    MissingRoot,

    #[error(
        "clock mismatch: {declared} does not match {calculated}. Ensure that the trace is fully connected and there are no clock issues."
    )]
    ClockMismatch { declared: String, calculated: String },

    #[error(
        "trace duration {declared} does not match the calculated trace duration {calculated} based on start and end times. Ensure that the trace is fully connected and there are no clock issues."
    )]
    InvariantViolation { declared: String, calculated: String },

    #[error("detected infinite loop starting from node {0}")]
    InfiniteLoop(String),

    #[error("negative time difference between current ({current}) and next ({next}) segment")]
    NegativeTimeDifference { current: String, next: String },

    #[error("malformed trace: {0}")]
    MalformedTrace(String),

    #[error("segment {0} has an error")]
    SegmentError(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the analysis core.
pub type Result<T> = std::result::Result<T, AnalysisError>;

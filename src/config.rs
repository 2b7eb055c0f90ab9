//! Tunable constants for the critical-path and trigger analyzers.
//!
//! Kept as a typed, overridable struct (rather than bare `const`s) so that
//! callers embedding this crate can tighten or loosen the clock-skew margins
//! without forking the analysis logic.

use std::time::Duration;

/// Analyzer-wide tunables.
///
/// The defaults mirror years of analyzing production X-Ray traces: a 1001µs
/// margin absorbs millisecond-vs-microsecond precision mismatches between
/// `AWS::Lambda` and `AWS::Lambda::Function` segments, and a 10ms threshold
/// catches genuine clock desynchronization rather than rounding noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Margin of error when comparing timestamps of potentially different
    /// precision. Used by the async-call heuristic and the trace-duration
    /// cross-check.
    pub timestamp_margin: Duration,

    /// Upper bound on an acceptable time shift while walking the critical
    /// path. Exceeding it during breakdown extraction signals a clock
    /// synchronization problem severe enough to invalidate the trace.
    pub timestamp_threshold: Duration,

    /// Number of `receiverN` landmark segments the trigger correlator looks
    /// for (`receiver1` .. `receiverN`).
    pub num_receiver_timestamps: u32,

    /// Maximum number of unmatched parent/child traces the trigger
    /// correlator holds in memory at once, per side. Once a side is full,
    /// inserting a new unmatched trace evicts the oldest one — but the
    /// evicted trace is not dropped: it is analyzed standalone right then,
    /// the same treatment given to whatever is still pending when the
    /// input ends, so it still lands in `trigger.csv` (or
    /// `trigger_invalid_traces.csv` if that standalone analysis fails).
    pub trigger_cache_capacity: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            timestamp_margin: Duration::from_micros(1_001),
            timestamp_threshold: Duration::from_micros(10_000),
            num_receiver_timestamps: 5,
            trigger_cache_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_margin_matches_known_value() {
        let cfg = AnalyzerConfig::default();
        assert_eq!(cfg.timestamp_margin, Duration::from_micros(1_001));
        assert_eq!(cfg.timestamp_threshold, Duration::from_micros(10_000));
        assert_eq!(cfg.num_receiver_timestamps, 5);
    }
}

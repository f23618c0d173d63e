//! Outcome evaluators and the combinable metrics model.
//!
//! Two labeling techniques classify what happened after each event:
//!
//! - **barriers** — triple-barrier: first touch of an upper/lower price
//!   barrier wins, otherwise the trade times out.
//! - **buckets** — bucketed-return: exit at first barrier touch or at the last
//!   observed candle, then classify the realized return into four
//!   magnitude/sign buckets.
//!
//! Each technique produces its own [`Metrics`] variant. Metrics combine
//! associatively and commutatively so that results from concurrent workers
//! and from different symbols can be merged in any order.

pub mod barrier;
pub mod bucket;
pub mod point;

pub use barrier::{BarrierMetrics, Outcome};
pub use bucket::BucketMetrics;

use crate::{CandleSeries, EvalError, Event, ParamSet, Result};

/// Win rate of `wins` against `losses`; 0.0 when there were no trades.
pub fn performance(wins: u64, losses: u64) -> f64 {
    let total = wins + losses;
    if total == 0 {
        return 0.0;
    }
    wins as f64 / total as f64
}

// ============================================================
// METRICS - closed set of combinable results
// ============================================================

/// A combinable, emittable summary of many classified outcomes.
///
/// The serde encoding is tagged with the evaluator name so heterogeneous
/// collections keep their variant identity across round-trips.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "evaluator")]
pub enum Metrics {
    #[serde(rename = "barriers")]
    Barrier(BarrierMetrics),
    #[serde(rename = "buckets")]
    Bucket(BucketMetrics),
}

impl Metrics {
    /// Name of the technique that produced this result.
    pub fn evaluator(&self) -> &'static str {
        match self {
            Metrics::Barrier(_) => "barriers",
            Metrics::Bucket(_) => "buckets",
        }
    }

    /// Pairwise sum of same-named counters.
    ///
    /// Fails on a variant mismatch and on a receiver that was already sealed
    /// for reporting. Associative and commutative.
    pub fn combine(&self, other: &Metrics) -> Result<Metrics> {
        if self.is_sealed() {
            return Err(EvalError::Sealed);
        }
        match (self, other) {
            (Metrics::Barrier(a), Metrics::Barrier(b)) => Ok(Metrics::Barrier(a.merged(b))),
            (Metrics::Bucket(a), Metrics::Bucket(b)) => Ok(Metrics::Bucket(a.merged(b))),
            _ => Err(EvalError::CombineMismatch {
                left: self.evaluator(),
                right: other.evaluator(),
            }),
        }
    }

    /// Scalar reporting value for a recognized key.
    ///
    /// Keys are `"worst"`, `"balanced"`, `"size"` and `"wins"`; rate-valued
    /// keys are scaled by 100. An unrecognized key is a programming error.
    pub fn emit(&self, key: &str) -> Result<f64> {
        match self {
            Metrics::Barrier(m) => m.emit(key),
            Metrics::Bucket(m) => m.emit(key),
        }
    }

    /// Count of decisive outcomes, per the variant's own convention.
    pub fn size(&self) -> usize {
        match self {
            Metrics::Barrier(m) => m.size(),
            Metrics::Bucket(m) => m.size(),
        }
    }

    /// The canonical win rate, equal to `emit("balanced")` unscaled.
    pub fn value(&self) -> f64 {
        match self {
            Metrics::Barrier(m) => m.value(),
            Metrics::Bucket(m) => m.value(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        match self {
            Metrics::Barrier(m) => m.sealed,
            Metrics::Bucket(m) => m.sealed,
        }
    }

    /// Freeze this result: any later combine is an error.
    pub fn seal(&mut self) {
        match self {
            Metrics::Barrier(m) => m.sealed = true,
            Metrics::Bucket(m) => m.sealed = true,
        }
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metrics::Barrier(m) => write!(f, "{m}"),
            Metrics::Bucket(m) => write!(f, "{m}"),
        }
    }
}

// ============================================================
// DIFF VIEW - comparison-only pairing
// ============================================================

/// A read-only pairing of a data result and a baseline result (typically a
/// random-event control) for comparative reporting.
///
/// Only the scalar comparison operations are valid; combining or sizing a
/// diff is a programming error, not an approximation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiffMetrics {
    pub base: Metrics,
    pub data: Metrics,
}

impl DiffMetrics {
    pub fn new(base: Metrics, data: Metrics) -> Self {
        Self { base, data }
    }

    pub fn evaluator(&self) -> String {
        format!("{}-{}", self.data.evaluator(), self.base.evaluator())
    }

    pub fn value(&self) -> f64 {
        self.data.value() - self.base.value()
    }

    pub fn emit(&self, key: &str) -> Result<f64> {
        Ok(self.data.emit(key)? - self.base.emit(key)?)
    }

    /// Diffs cannot be combined.
    pub fn combine(&self, _other: &DiffMetrics) -> Result<DiffMetrics> {
        Err(EvalError::DiffUnsupported("combine"))
    }

    /// Diffs have no meaningful size.
    pub fn size(&self) -> Result<usize> {
        Err(EvalError::DiffUnsupported("size"))
    }
}

// ============================================================
// TECHNIQUE REGISTRY
// ============================================================

/// The closed set of outcome-labeling techniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Technique {
    Barriers,
    Buckets,
}

impl Technique {
    pub const ALL: [Technique; 2] = [Technique::Barriers, Technique::Buckets];

    pub fn from_name(name: &str) -> Result<Technique> {
        match name {
            "barriers" => Ok(Technique::Barriers),
            "buckets" => Ok(Technique::Buckets),
            other => Err(EvalError::UnknownTechnique(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Technique::Barriers => "barriers",
            Technique::Buckets => "buckets",
        }
    }

    /// Classify every event against the series under this technique.
    pub fn evaluate(
        self,
        series: &CandleSeries,
        interval: i64,
        events: &[Event],
        params: &ParamSet,
    ) -> Result<Metrics> {
        match self {
            Technique::Barriers => {
                barrier::evaluate(series, interval, events, params.threshold, params.timeout)
                    .map(Metrics::Barrier)
            }
            Technique::Buckets => {
                bucket::evaluate(series, interval, events, params.threshold, params.timeout)
                    .map(Metrics::Bucket)
            }
        }
    }
}

// ============================================================
// TESTS
// ============================================================

//! # pattern-backtest
//!
//! Backtests discrete trading-pattern events against historical candle series.
//!
//! Detection algorithms (external to this crate) claim that a pattern occurred
//! at some timestamp. This crate answers the question "what happened next?"
//! under two competing labeling rules — triple-barrier and bucketed-return —
//! and reduces many such answers into combinable summary metrics and 2-D
//! comparison grids across a hyperparameter sweep.
//!
//! ## Quick Start
//!
//! ```rust
//! use pattern_backtest::prelude::*;
//!
//! // A 20-day candle series starting at the epoch, trending up 1% per day.
//! let candles: Vec<Candle> = (0..20)
//!     .map(|i| {
//!         let open = 100.0 * 1.01f64.powi(i);
//!         Candle::new(i as i64 * INTERVAL_1D, open, open * 1.015, open * 0.99, open * 1.01)
//!     })
//!     .collect();
//! let series = vec![CandleSet::new(0, INTERVAL_1D, candles)];
//!
//! // One event at day 0; entry is booked one interval later.
//! let events = vec![Event::new(0)];
//! let metrics = barrier::evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
//! assert_eq!(metrics.size(), 1);
//! ```

pub mod config;
pub mod evaluators;
pub mod grid;
pub mod pipeline;

pub mod prelude {
    pub use crate::{
        // Sweep configuration
        config::EvalParams,
        // Classifiers
        evaluators::{barrier, bucket, point},
        // Metrics model
        evaluators::{BarrierMetrics, BucketMetrics, DiffMetrics, Metrics, Technique},
        // Grids
        grid::{build_grid, diff_tables, Grid, MetricsTable},
        // Pipeline
        pipeline::CandleCache,
        // Data model
        candle_at,
        AlgorithmProvider,
        Candle,
        CandleSeries,
        CandleSet,
        EvalConfig,
        EvalError,
        Event,
        Exchange,
        ExchangeCatalog,
        MarketDataProvider,
        ParamSet,
        Result,
        ResultItem,
        ScenarioSet,
        ScenarioStore,
        INTERVAL_1D,
    };
}

/// One day of candle time, in seconds.
pub const INTERVAL_1D: i64 = 86_400;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur during event evaluation and aggregation
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    /// A collaborator (market data, algorithm, catalog) failed. Fatal for the run.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("unknown technique: {0}")]
    UnknownTechnique(String),

    #[error("no scenario harvested for sensitivity {0}")]
    ScenarioNotFound(f64),

    #[error("cannot combine {left} metrics with {right} metrics")]
    CombineMismatch {
        left: &'static str,
        right: &'static str,
    },

    #[error("metrics already sealed for reporting")]
    Sealed,

    #[error("unknown emit key: {0}")]
    UnknownEmitKey(String),

    #[error("realized return is NaN for event at {event_time}")]
    NanReturn { event_time: i64 },

    #[error("event timestamp {0} outside representable range")]
    InvalidTimestamp(i64),

    #[error("{0} is not supported on diff metrics")]
    DiffUnsupported(&'static str),

    #[error("grid shape mismatch: {0}")]
    GridShape(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("worker pool: {0}")]
    Pool(String),
}

// ============================================================
// EVENTS
// ============================================================

/// A timestamped claim by a detection algorithm that a pattern occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    /// Seconds since the epoch of the candle in which the pattern completed.
    pub time: i64,
}

impl Event {
    pub fn new(time: i64) -> Self {
        Self { time }
    }
}

/// The output of one detection run: the detector's own parameter vector plus
/// every event it found for one symbol.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScenarioSet {
    pub parameters: Vec<f64>,
    pub events: Vec<Event>,
}

// ============================================================
// PARAMETERS
// ============================================================

/// One point of the hyperparameter sweep.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParamSet {
    /// Barrier width as a fraction of the entry price.
    pub threshold: f64,
    /// Maximum candles held before a forced exit.
    pub timeout: i64,
    /// Detector sensitivity values (e.g. the high/low lookback), in the order
    /// the detection algorithm expects them.
    pub params: Vec<f64>,
}

impl ParamSet {
    pub fn new(threshold: f64, timeout: i64, params: Vec<f64>) -> Self {
        Self {
            threshold,
            timeout,
            params,
        }
    }
}

/// Identifies the run that produced a result: which algorithm, which symbol,
/// and which sweep point.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvalConfig {
    pub name: String,
    pub symbol: String,
    pub options: ParamSet,
}

/// A classified unit of work: one (symbol, sweep point) pair and its metrics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultItem {
    pub config: EvalConfig,
    pub result: evaluators::Metrics,
}

// ============================================================
// CANDLES
// ============================================================

/// One OHLC time bucket of one symbol.
///
/// `missing` marks buckets with no trade data; it is distinct from a candle
/// whose prices happen to be zero.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub missing: bool,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            missing: false,
        }
    }

    /// A placeholder for a bucket with no trade data.
    pub fn absent(time: i64) -> Self {
        Self {
            time,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            missing: true,
        }
    }
}

/// A contiguous range of candles at a fixed interval.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CandleSet {
    pub start_time: i64,
    pub interval: i64,
    pub candles: Vec<Candle>,
}

impl CandleSet {
    pub fn new(start_time: i64, interval: i64, candles: Vec<Candle>) -> Self {
        Self {
            start_time,
            interval,
            candles,
        }
    }

    /// Timestamp of the first bucket.
    #[inline]
    pub fn first_time(&self) -> i64 {
        self.start_time
    }

    /// Timestamp of the last bucket.
    #[inline]
    pub fn last_time(&self) -> i64 {
        self.start_time + self.interval * (self.candles.len() as i64 - 1).max(0)
    }

    /// The candle whose bucket contains `ts`, if `ts` falls inside this range.
    pub fn at_time(&self, ts: i64) -> Option<&Candle> {
        if self.candles.is_empty() || ts < self.first_time() || self.last_time() < ts {
            return None;
        }
        let index = (ts - self.start_time) / self.interval;
        self.candles.get(index as usize)
    }
}

/// An ordered, non-overlapping sequence of candle ranges for one symbol.
pub type CandleSeries = Vec<CandleSet>;

/// Point lookup by timestamp across a series.
///
/// Returns `None` when the timestamp falls in a gap between ranges, outside
/// every range, or on a candle flagged missing. The scan is O(ranges); a
/// series holds few ranges relative to the number of lookups.
pub fn candle_at(ts: i64, series: &CandleSeries) -> Option<&Candle> {
    for set in series {
        if ts < set.first_time() || set.last_time() < ts {
            continue;
        }
        let candle = set.at_time(ts)?;
        if candle.missing {
            return None;
        }
        return Some(candle);
    }
    None
}

// ============================================================
// PROVIDER CONTRACTS
// ============================================================

/// Supplies full candle histories. Implemented by the caller; a fetch failure
/// is fatal for the run.
pub trait MarketDataProvider: Send + Sync {
    fn fetch_candles(&self, interval: i64, resolution: i64, symbol: &str) -> Result<CandleSeries>;
}

/// Runs a detection algorithm for one symbol and parameter vector.
pub trait AlgorithmProvider: Send + Sync {
    fn detect(
        &self,
        algorithm: &str,
        interval: i64,
        symbol: &str,
        params: &[f64],
        force_refresh: bool,
    ) -> Result<ScenarioSet>;
}

/// An exchange and the symbols it lists.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Exchange {
    pub id: String,
    pub symbols: Vec<String>,
}

/// Supplies the exchange/symbol catalog.
pub trait ExchangeCatalog: Send + Sync {
    fn exchanges(&self) -> Result<Vec<Exchange>>;
}

/// Loads previously harvested scenarios for an (algorithm, symbol) pair.
/// The on-disk format is the caller's choice; it only has to round-trip.
pub trait ScenarioStore: Send + Sync {
    fn load(&self, algorithm: &str, symbol: &str) -> Result<Vec<ScenarioSet>>;
}

// ============================================================
// TESTS
// ============================================================

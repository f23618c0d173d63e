//! Bucketed-return outcome classifier.
//!
//! Shares the triple-barrier entry discovery but walks exactly `timeout`
//! steps with no missing-gap extension, exits at the first barrier touch or
//! at the last observed close, and classifies the realized return into four
//! ordered buckets relative to `threshold / 2`:
//!
//! | bucket | return            |            |
//! |--------|-------------------|------------|
//! | 0      | `<= -threshold/2` | strong loss|
//! | 1      | `(-threshold/2, 0)` | mild loss|
//! | 2      | `(0, threshold/2)`  | mild gain|
//! | 3      | `>= threshold/2`  | strong gain|
//!
//! A realized return of exactly zero lands in no bucket (and is not counted
//! as undefined); this mirrors the reference behavior.

use crate::evaluators::{barrier::find_entry, performance};
use crate::{candle_at, CandleSeries, EvalError, Event, Result};

/// Accumulated bucketed-return outcomes.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BucketMetrics {
    /// Exit counts per return bucket, strong loss to strong gain.
    pub buckets: [u64; 4],
    /// Events with no usable entry candle; excluded from all denominators.
    pub undefined: u64,
    /// Running sum of realized returns (signed fractions).
    pub sum_return: f64,
    /// Set once the result is frozen for reporting.
    #[serde(default)]
    pub sealed: bool,
}

impl BucketMetrics {
    #[inline]
    pub fn bucket(&self, i: usize) -> u64 {
        self.buckets[i]
    }

    /// Decisive outcomes: every bucketed exit.
    pub fn size(&self) -> usize {
        self.buckets.iter().sum::<u64>() as usize
    }

    /// Balanced win rate: strong gains against strong losses.
    pub fn value(&self) -> f64 {
        performance(self.bucket(3), self.bucket(0))
    }

    pub fn emit(&self, key: &str) -> Result<f64> {
        match key {
            // Worst case: any gain against any loss, ties favoring losses.
            "worst" => Ok(performance(
                self.bucket(2) + self.bucket(3),
                self.bucket(0) + self.bucket(1),
            ) * 100.0),
            "balanced" => Ok(self.value() * 100.0),
            "size" => Ok(self.size() as f64),
            "wins" => Ok((self.bucket(2) + self.bucket(3)) as f64),
            other => Err(EvalError::UnknownEmitKey(other.to_string())),
        }
    }

    /// Pairwise counter sums. The result is unsealed.
    pub(crate) fn merged(&self, other: &BucketMetrics) -> BucketMetrics {
        let mut combined = self.clone();
        combined.sealed = false;
        for (dst, src) in combined.buckets.iter_mut().zip(other.buckets.iter()) {
            *dst += src;
        }
        combined.undefined += other.undefined;
        combined.sum_return += other.sum_return;
        combined
    }
}

impl std::fmt::Display for BucketMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.buckets[0], self.buckets[1], self.buckets[2], self.buckets[3]
        )
    }
}

// ============================================================
// CLASSIFICATION
// ============================================================

/// Realized return of the exit walk, or `None` when no usable entry existed.
fn find_exit(
    event: &Event,
    threshold: f64,
    timeout: i64,
    interval: i64,
    series: &CandleSeries,
) -> Option<f64> {
    let entry = match find_entry(event, interval, series) {
        Some(c) if c.open != 0.0 => c,
        _ => return None,
    };

    let entry_price = entry.open;
    let start_time = entry.time;

    let upper_barrier = entry_price * (1.0 + threshold);
    let lower_barrier = entry_price * (1.0 - threshold);

    let mut last = entry;

    for i in 0..timeout {
        let candle = match candle_at(start_time + i * interval, series) {
            Some(c) => c,
            None => continue,
        };
        last = candle;

        // Same tie-break as the triple barrier: lower checked first.
        if candle.low <= lower_barrier {
            return Some((lower_barrier - entry_price) / entry_price);
        }
        if candle.high >= upper_barrier {
            return Some((upper_barrier - entry_price) / entry_price);
        }
    }

    // No touch: fall back on the last candle actually observed.
    Some((last.close - entry_price) / entry_price)
}

/// Classify every event under the bucketed-return rule.
pub fn evaluate(
    series: &CandleSeries,
    interval: i64,
    events: &[Event],
    threshold: f64,
    timeout: i64,
) -> Result<BucketMetrics> {
    let mut metrics = BucketMetrics::default();
    let half = threshold / 2.0;

    for event in events {
        let exit = match find_exit(event, threshold, timeout, interval, series) {
            Some(exit) => exit,
            None => {
                metrics.undefined += 1;
                continue;
            }
        };
        if exit.is_nan() {
            return Err(EvalError::NanReturn {
                event_time: event.time,
            });
        }

        metrics.sum_return += exit;
        if exit > 0.0 && exit < half {
            metrics.buckets[2] += 1;
        } else if exit < 0.0 && exit > -half {
            metrics.buckets[1] += 1;
        } else if exit > 0.0 {
            metrics.buckets[3] += 1;
        } else if exit < 0.0 {
            metrics.buckets[0] += 1;
        }
        // exit == 0.0 falls through: counted in sum_return only.
    }

    Ok(metrics)
}

// ============================================================
// TESTS
// ============================================================

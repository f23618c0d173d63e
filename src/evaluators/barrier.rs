//! Triple-barrier outcome classifier.
//!
//! A trade opens at the first usable candle after the event becomes knowable,
//! with an upper and a lower barrier a `threshold` fraction away from the
//! entry price. The first barrier touched decides the outcome; a walk that
//! exhausts the time limit exits at the last seen close.

use std::collections::BTreeMap;

use chrono::Datelike;

use crate::evaluators::performance;
use crate::{candle_at, CandleSeries, EvalError, Event, Result};

/// How many interval steps past the book time the entry-candle search covers.
const ENTRY_SEARCH_STEPS: i64 = 10;

/// What happened after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Outcome {
    UpperHit = 0,
    LowerHit = 1,
    TimeLimit = 2,
    /// No usable entry candle existed; excluded from all denominators.
    Undefined = 3,
}

/// Per-year outcome counts for year-over-year reporting.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct YearRow {
    pub year: i32,
    pub ups: u64,
    pub downs: u64,
    pub timeouts: u64,
    pub performance: f64,
}

/// Accumulated triple-barrier outcomes.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BarrierMetrics {
    /// Outcome counts indexed by [`Outcome`].
    pub counts: [u64; 4],
    /// Outcome counts sliced by the UTC calendar year of the event itself.
    ///
    /// JSON map keys are strings; the internally tagged [`Metrics`] enum
    /// buffers them as such, so deserialization parses the keys explicitly.
    ///
    /// [`Metrics`]: crate::evaluators::Metrics
    #[serde(deserialize_with = "deserialize_by_year")]
    pub by_year: BTreeMap<i32, [u64; 4]>,
    /// Running sum of realized returns (signed fractions).
    pub sum_return: f64,
    /// Running sum of holding time, in candles.
    pub sum_time: i64,
    /// Set once the result is frozen for reporting.
    #[serde(default)]
    pub sealed: bool,
}

fn deserialize_by_year<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<i32, [u64; 4]>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let raw = BTreeMap::<String, [u64; 4]>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(year, counts)| {
            year.parse::<i32>()
                .map(|year| (year, counts))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl BarrierMetrics {
    pub fn up_trends(&self) -> u64 {
        self.counts[Outcome::UpperHit as usize]
    }

    pub fn down_trends(&self) -> u64 {
        self.counts[Outcome::LowerHit as usize]
    }

    pub fn timeouts(&self) -> u64 {
        self.counts[Outcome::TimeLimit as usize]
    }

    pub fn undefined(&self) -> u64 {
        self.counts[Outcome::Undefined as usize]
    }

    /// Decisive outcomes: barrier hits only, timeouts excluded by design.
    pub fn size(&self) -> usize {
        (self.up_trends() + self.down_trends()) as usize
    }

    /// Balanced win rate: upper hits against lower hits.
    pub fn value(&self) -> f64 {
        performance(self.up_trends(), self.down_trends())
    }

    pub fn emit(&self, key: &str) -> Result<f64> {
        match key {
            "worst" => Ok(performance(self.up_trends(), self.down_trends() + self.timeouts()) * 100.0),
            "balanced" => Ok(self.value() * 100.0),
            "size" => Ok(self.size() as f64),
            "wins" => Ok(self.up_trends() as f64),
            other => Err(EvalError::UnknownEmitKey(other.to_string())),
        }
    }

    /// Pairwise counter sums. The result is unsealed.
    pub(crate) fn merged(&self, other: &BarrierMetrics) -> BarrierMetrics {
        let mut combined = self.clone();
        combined.sealed = false;
        for (dst, src) in combined.counts.iter_mut().zip(other.counts.iter()) {
            *dst += src;
        }
        for (year, src) in &other.by_year {
            let dst = combined.by_year.entry(*year).or_default();
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d += s;
            }
        }
        combined.sum_return += other.sum_return;
        combined.sum_time += other.sum_time;
        combined
    }

    fn record(&mut self, year: i32, outcome: Outcome, profit: f64, elapsed: i64) {
        self.counts[outcome as usize] += 1;
        self.sum_return += profit;
        self.sum_time += elapsed;
        self.by_year.entry(year).or_default()[outcome as usize] += 1;
    }

    /// Sorted per-year rows for year-over-year export.
    pub fn year_rows(&self) -> Vec<YearRow> {
        self.by_year
            .iter()
            .map(|(&year, counts)| {
                let ups = counts[Outcome::UpperHit as usize];
                let downs = counts[Outcome::LowerHit as usize];
                YearRow {
                    year,
                    ups,
                    downs,
                    timeouts: counts[Outcome::TimeLimit as usize],
                    performance: performance(ups, downs),
                }
            })
            .collect()
    }
}

impl std::fmt::Display for BarrierMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}+{}",
            self.up_trends(),
            self.down_trends(),
            self.timeouts()
        )
    }
}

// ============================================================
// CLASSIFICATION
// ============================================================

/// Locate the entry candle for an event: the first non-missing candle within
/// [`ENTRY_SEARCH_STEPS`] interval steps of the book time.
pub(crate) fn find_entry<'a>(
    event: &Event,
    interval: i64,
    series: &'a CandleSeries,
) -> Option<&'a crate::Candle> {
    // The event is only knowable once its own candle has closed.
    let book_time = event.time + interval;
    for i in 0..ENTRY_SEARCH_STEPS {
        if let Some(candle) = candle_at(book_time + i * interval, series) {
            return Some(candle);
        }
    }
    None
}

fn find_outcome(
    event: &Event,
    threshold: f64,
    time_limit: i64,
    interval: i64,
    series: &CandleSeries,
) -> (Outcome, f64, i64) {
    let entry = match find_entry(event, interval, series) {
        Some(c) if c.open != 0.0 => c,
        _ => return (Outcome::Undefined, 0.0, 0),
    };

    // Entry is at the open of the entry candle; the walk starts from the
    // candle's own timestamp, which may be later than the book time.
    let entry_price = entry.open;
    let start_time = entry.time;

    let upper_barrier = entry_price * (1.0 + threshold);
    let lower_barrier = entry_price * (1.0 - threshold);

    // The walk tolerates short missing-data runs near the time limit: the
    // condition keeps iterating while 1 < missing < 5, so a gap of exactly
    // 2-4 missing candles extends the window until the next seen candle,
    // while a single missing candle or a run of 5+ does not.
    let mut missing = 0i64;
    let mut last = entry;

    let mut i = 0i64;
    while i < time_limit || (missing > 1 && missing < 5) {
        match candle_at(start_time + i * interval, series) {
            None => missing += 1,
            Some(candle) => {
                missing = 0;
                last = candle;
                // Lower barrier checked first: a candle spanning both
                // barriers counts as a loss.
                if candle.low <= lower_barrier {
                    let profit = (lower_barrier - entry_price) / entry_price;
                    return (Outcome::LowerHit, profit, i);
                }
                if candle.high >= upper_barrier {
                    let profit = (upper_barrier - entry_price) / entry_price;
                    return (Outcome::UpperHit, profit, i);
                }
            }
        }
        i += 1;
    }

    let profit = (last.close - entry_price) / entry_price;
    (Outcome::TimeLimit, profit, time_limit)
}

/// Classify every event under the triple-barrier rule.
///
/// Counters are sliced by the UTC calendar year of each event's original
/// timestamp. A NaN realized return is a broken invariant and aborts the run.
pub fn evaluate(
    series: &CandleSeries,
    interval: i64,
    events: &[Event],
    threshold: f64,
    timeout: i64,
) -> Result<BarrierMetrics> {
    let mut metrics = BarrierMetrics::default();

    for event in events {
        let year = chrono::DateTime::from_timestamp(event.time, 0)
            .ok_or(EvalError::InvalidTimestamp(event.time))?
            .year();
        let (outcome, profit, elapsed) = find_outcome(event, threshold, timeout, interval, series);
        if profit.is_nan() {
            return Err(EvalError::NanReturn {
                event_time: event.time,
            });
        }
        metrics.record(year, outcome, profit, elapsed);
    }

    Ok(metrics)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Candle, CandleSet, INTERVAL_1D};

    /// A flat series at `price` with +-1 high/low wiggle, n days from day 0.
    fn flat_series(n: usize, price: f64) -> CandleSeries {
        let candles = (0..n)
            .map(|i| {
                Candle::new(
                    i as i64 * INTERVAL_1D,
                    price,
                    price + 1.0,
                    price - 1.0,
                    price,
                )
            })
            .collect();
        vec![CandleSet::new(0, INTERVAL_1D, candles)]
    }

    fn day(series: &mut CandleSeries, index: usize) -> &mut Candle {
        &mut series[0].candles[index]
    }

    #[test]
    fn test_upper_hit() {
        let mut series = flat_series(20, 100.0);
        // Entry at day 1 open = 100; upper barrier = 105.
        day(&mut series, 4).high = 106.0;
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.up_trends(), 1);
        assert_eq!(m.size(), 1);
        assert_eq!(m.sum_time, 3);
        assert!((m.sum_return - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_lower_hit() {
        let mut series = flat_series(20, 100.0);
        day(&mut series, 3).low = 94.0;
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.down_trends(), 1);
        assert!((m.sum_return + 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_tie_break_prefers_lower() {
        let mut series = flat_series(20, 100.0);
        // One candle spans both barriers.
        day(&mut series, 5).high = 110.0;
        day(&mut series, 5).low = 90.0;
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.down_trends(), 1);
        assert_eq!(m.up_trends(), 0);
    }

    #[test]
    fn test_timeout_exits_at_last_close() {
        let mut series = flat_series(20, 100.0);
        for c in &mut series[0].candles {
            c.close = 101.0;
        }
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.size(), 0); // timeouts are not decisive
        assert_eq!(m.sum_time, 14);
        assert!((m.sum_return - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_when_no_entry_candle() {
        let mut series = flat_series(20, 100.0);
        // Blank the whole 10-step entry search window after book time (day 1).
        for i in 1..=10 {
            let ts = i as i64 * INTERVAL_1D;
            *day(&mut series, i) = Candle::absent(ts);
        }
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.undefined(), 1);
        assert_eq!(m.size(), 0);
        assert_eq!(m.value(), 0.0);
        assert_eq!(m.sum_time, 0);
    }

    #[test]
    fn test_undefined_on_zero_open() {
        let mut series = flat_series(20, 100.0);
        day(&mut series, 1).open = 0.0;
        // The first non-missing candle wins the entry search, so a zero open
        // there decides the event even though later candles are usable.
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.undefined(), 1);
    }

    #[test]
    fn test_skipped_entry_candles_shift_entry() {
        let mut series = flat_series(20, 100.0);
        *day(&mut series, 1) = Candle::absent(INTERVAL_1D);
        *day(&mut series, 2) = Candle::absent(2 * INTERVAL_1D);
        day(&mut series, 3).open = 200.0; // entry lands on day 3
        day(&mut series, 6).high = 211.0; // 200 * 1.05 = 210
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.up_trends(), 1);
        assert_eq!(m.sum_time, 3);
    }

    // Boundary case: the walk condition `i < timeout || (1 < missing < 5)`
    // extends iteration past the time limit only while a missing run of
    // exactly 2-4 candles is open. Preserved literally from the reference
    // behavior; these tests pin it down.

    #[test]
    fn test_missing_gap_extends_past_time_limit() {
        let mut series = flat_series(30, 100.0);
        // Timeout 5: walk covers days 1..=5. Days 4-7 are a 4-candle gap,
        // which keeps the loop alive past i=5 until day 8 is seen.
        for i in 4..=7 {
            let ts = i as i64 * INTERVAL_1D;
            *day(&mut series, i) = Candle::absent(ts);
        }
        day(&mut series, 8).high = 106.0;
        let events = [Event::new(0)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 5).unwrap();
        // i runs 0..=7: day 8 is reached at i=7, past the nominal limit.
        assert_eq!(m.up_trends(), 1);
        assert_eq!(m.sum_time, 7);
    }

    #[test]
    fn test_single_missing_candle_does_not_extend() {
        let mut series = flat_series(30, 100.0);
        *day(&mut series, 5) = Candle::absent(5 * INTERVAL_1D);
        day(&mut series, 6).high = 106.0;
        let events = [Event::new(0)];
        // The missing day 5 leaves missing == 1 when the timeout condition is
        // re-checked, so no extension; the trade times out.
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 5).unwrap();
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.up_trends(), 0);
    }

    #[test]
    fn test_long_missing_run_gives_up() {
        let mut series = flat_series(30, 100.0);
        for i in 2..=7 {
            let ts = i as i64 * INTERVAL_1D;
            *day(&mut series, i) = Candle::absent(ts);
        }
        day(&mut series, 8).high = 106.0;
        let events = [Event::new(0)];
        // Timeout 3: the gap reaches 5 missing candles before anything is
        // seen again, which stops the extension; exit at the last seen close.
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 3).unwrap();
        assert_eq!(m.timeouts(), 1);
    }

    #[test]
    fn test_by_year_slicing_uses_event_year() {
        let mut series = flat_series(400, 100.0);
        day(&mut series, 3).high = 106.0;
        // 1970-01-01 and 1971-01-05 (day 369).
        series[0].candles[372].high = 106.0;
        let events = [Event::new(0), Event::new(369 * INTERVAL_1D)];
        let m = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(m.by_year.len(), 2);
        assert_eq!(m.by_year[&1970][Outcome::UpperHit as usize], 1);
        assert_eq!(m.by_year[&1971][Outcome::UpperHit as usize], 1);
    }

    #[test]
    fn test_determinism() {
        let mut series = flat_series(20, 100.0);
        day(&mut series, 4).high = 106.0;
        let events = [Event::new(0)];
        let a = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        let b = evaluate(&series, INTERVAL_1D, &events, 0.05, 14).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_year_rows_sorted() {
        let mut m = BarrierMetrics::default();
        m.record(1971, Outcome::UpperHit, 0.05, 3);
        m.record(1970, Outcome::LowerHit, -0.05, 2);
        let rows = m.year_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].year, 1970);
        assert_eq!(rows[0].downs, 1);
        assert_eq!(rows[1].year, 1971);
        assert_eq!(rows[1].performance, 1.0);
    }

    #[test]
    fn test_display_format() {
        let mut m = BarrierMetrics::default();
        m.counts = [3, 1, 2, 4];
        assert_eq!(m.to_string(), "3/1+2");
    }
}

//! Point-in-time control evaluator.
//!
//! The cheapest possible sanity check: the return of the candle the event
//! itself landed on, averaged over all events. A detector with no edge should
//! score near zero here, as should a random-event control.

use crate::{candle_at, CandleSeries, Event};

/// Open-to-close return of the event's own candle, or `None` when the candle
/// is absent or has a zero open.
fn same_candle_return(event: &Event, series: &CandleSeries) -> Option<f64> {
    let candle = candle_at(event.time, series)?;
    if candle.open == 0.0 {
        return None;
    }
    Some((candle.close - candle.open) / candle.open)
}

/// Mean same-candle return over `events`.
///
/// Events without a usable candle contribute zero but stay in the
/// denominator, so sparse data pulls the estimate toward zero rather than
/// inflating it. Returns 0.0 for an empty slice.
pub fn evaluate(series: &CandleSeries, events: &[Event]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let sum: f64 = events
        .iter()
        .filter_map(|e| same_candle_return(e, series))
        .sum();
    sum / events.len() as f64
}

//! Hyperparameter sweep configuration.
//!
//! A sweep is described by a small plain-text file of four whitespace-separated
//! lines: barrier thresholds, time limits, detector sensitivity values used
//! during evaluation, and detector sensitivity values used during harvesting.
//!
//! ```text
//! 0.02 0.03 0.05
//! 7 14 28
//! 10 20
//! 10 20 30
//! ```

use crate::{EvalError, Exchange, ParamSet, Result};

/// Detection algorithms a full run sweeps over. `"random"` is the control.
pub const DEFAULT_ALGORITHMS: [&str; 6] = [
    "double-top",
    "double-bottom",
    "random",
    "triple-top",
    "triple-bottom",
    "head-and-shoulders",
];

/// The axes of a hyperparameter sweep.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvalParams {
    /// Barrier widths, as fractions of the entry price.
    pub thresholds: Vec<f64>,
    /// Maximum candles held before a forced exit.
    pub time_limits: Vec<i64>,
    /// Detector sensitivity values evaluated against each other.
    pub high_low_range: Vec<f64>,
    /// Detector sensitivity values the harvest stage fetches events for.
    pub high_low_test: Vec<f64>,
}

impl EvalParams {
    /// Parse the four-line sweep format. Lines past the fourth are ignored;
    /// a shorter file leaves the remaining axes empty.
    pub fn parse(text: &str) -> Result<EvalParams> {
        let mut params = EvalParams::default();
        for (line_number, line) in text.lines().enumerate() {
            match line_number {
                0 => params.thresholds = parse_floats(line)?,
                1 => params.time_limits = parse_ints(line)?,
                2 => params.high_low_range = parse_floats(line)?,
                3 => params.high_low_test = parse_floats(line)?,
                _ => break,
            }
        }
        Ok(params)
    }

    /// The full cross-product of thresholds, time limits and sensitivity
    /// values, in axis-major order.
    pub fn combinations(&self) -> Vec<ParamSet> {
        let mut combinations = Vec::new();
        for &threshold in &self.thresholds {
            for &timeout in &self.time_limits {
                for &p1 in &self.high_low_range {
                    combinations.push(ParamSet::new(threshold, timeout, vec![p1]));
                }
            }
        }
        combinations
    }

    pub fn threshold_labels(&self) -> Vec<String> {
        self.thresholds
            .iter()
            .map(|v| format!("thld:{v:.3}"))
            .collect()
    }

    pub fn range_labels(&self) -> Vec<String> {
        self.high_low_range
            .iter()
            .map(|v| format!("rng:{v:.2}"))
            .collect()
    }

    pub fn limit_labels(&self) -> Vec<String> {
        self.time_limits
            .iter()
            .map(|v| format!("limit:{v}"))
            .collect()
    }
}

fn parse_floats(line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|field| {
            field
                .parse::<f64>()
                .map_err(|e| EvalError::InvalidConfig(format!("bad float {field:?}: {e}")))
        })
        .collect()
}

fn parse_ints(line: &str) -> Result<Vec<i64>> {
    line.split_whitespace()
        .map(|field| {
            field
                .parse::<i64>()
                .map_err(|e| EvalError::InvalidConfig(format!("bad integer {field:?}: {e}")))
        })
        .collect()
}

/// Symbols listed on `exchange_id`, minus denylisted entries.
pub fn filter_symbols(exchanges: &[Exchange], exchange_id: &str, denylist: &[&str]) -> Vec<String> {
    let mut symbols = Vec::new();
    for exchange in exchanges {
        if exchange.id != exchange_id {
            continue;
        }
        for symbol in &exchange.symbols {
            if denylist.contains(&symbol.as_str()) {
                continue;
            }
            symbols.push(symbol.clone());
        }
    }
    symbols
}

// ============================================================
// TESTS
// ============================================================

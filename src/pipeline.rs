//! Bounded-concurrency harvest and evaluation stages.
//!
//! A full run has two stages. *Harvest* asks the detection algorithm for
//! events, one unit per sensitivity value. *Evaluate* classifies every
//! harvested event list under one technique, one unit per (symbol,
//! parameter combination). Each stage runs its units on a dedicated
//! fixed-size thread pool, so at most that many units are in flight, and
//! joins them all before returning. The first unit error aborts the stage
//! with no partial output.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info};

use crate::config::EvalParams;
use crate::evaluators::{Metrics, Technique};
use crate::grid::{build_grid, Grid, MetricsTable};
use crate::{
    AlgorithmProvider, CandleSeries, EvalConfig, EvalError, MarketDataProvider, ParamSet, Result,
    ResultItem, ScenarioSet, ScenarioStore,
};

/// Concurrent detection fetches during the harvest stage.
pub const HARVEST_WORKERS: usize = 15;
/// Concurrent classification units during the evaluation stage.
pub const EVALUATE_WORKERS: usize = 10;

/// Time limit the threshold-vs-range table is pinned to.
pub const DEFAULT_TIME_LIMIT: i64 = 14;

/// Threshold band and time limit the year-over-year fold selects.
const YOY_THRESHOLDS: (f64, f64) = (0.02, 0.05);
const YOY_TIME_LIMIT: i64 = 14;

fn worker_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| EvalError::Pool(e.to_string()))
}

// ============================================================
// CANDLE CACHE
// ============================================================

/// A per-run cache of full candle histories, shared by every evaluation unit.
///
/// The same (interval, resolution, symbol) history is read once from the
/// provider and handed out as a shared `Arc` afterwards. A provider failure
/// is returned to the caller and never cached.
pub struct CandleCache {
    provider: Arc<dyn MarketDataProvider>,
    entries: Mutex<HashMap<(i64, i64, String), Arc<CandleSeries>>>,
}

impl CandleCache {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The cached series, fetching and storing it on first use.
    ///
    /// The lock is held across the fetch so concurrent first readers of one
    /// symbol do not race the provider.
    pub fn get(&self, interval: i64, resolution: i64, symbol: &str) -> Result<Arc<CandleSeries>> {
        let key = (interval, resolution, symbol.to_string());
        let mut entries = self.entries.lock().expect("candle cache lock poisoned");
        if let Some(series) = entries.get(&key) {
            return Ok(Arc::clone(series));
        }
        debug!(symbol, interval, "cache miss, fetching candles");
        let series = Arc::new(self.provider.fetch_candles(interval, resolution, symbol)?);
        entries.insert(key, Arc::clone(&series));
        Ok(series)
    }

    /// Number of distinct histories currently cached.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("candle cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================
// HARVEST STAGE
// ============================================================

/// Fetch one scenario per sensitivity value, at most [`HARVEST_WORKERS`]
/// in flight.
///
/// The `"random"` control algorithm takes no sensitivity parameter of its
/// own; it is fetched once per sweep value with a fixed placeholder and the
/// result is relabeled with the sweep value, so downstream scenario lookup
/// treats it like any other algorithm.
pub fn harvest_scenarios(
    algorithms: &dyn AlgorithmProvider,
    algorithm: &str,
    interval: i64,
    symbol: &str,
    sweep: &[f64],
) -> Result<Vec<ScenarioSet>> {
    let start = Instant::now();
    let pool = worker_pool(HARVEST_WORKERS)?;

    let results = Mutex::new(Vec::with_capacity(sweep.len()));
    pool.install(|| {
        sweep.par_iter().try_for_each(|&value| -> Result<()> {
            let scenario = if algorithm == "random" {
                let mut scenario =
                    algorithms.detect(algorithm, interval, symbol, &[0.01], true)?;
                scenario.parameters[0] = value;
                scenario
            } else {
                algorithms.detect(algorithm, interval, symbol, &[value], true)?
            };
            results
                .lock()
                .expect("harvest results lock poisoned")
                .push(scenario);
            Ok(())
        })
    })?;

    let results = results
        .into_inner()
        .expect("harvest results lock poisoned");
    info!(
        algorithm,
        symbol,
        scenarios = results.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "harvest complete"
    );
    Ok(results)
}

// ============================================================
// EVALUATION STAGE
// ============================================================

/// The scenario whose leading detector parameter matches the combination.
fn find_scenario<'a>(params: &ParamSet, scenarios: &'a [ScenarioSet]) -> Result<&'a ScenarioSet> {
    let wanted = params.params.first();
    scenarios
        .iter()
        .find(|s| s.parameters.first() == wanted)
        .ok_or_else(|| EvalError::ScenarioNotFound(wanted.copied().unwrap_or(f64::NAN)))
}

/// Classify every (symbol, combination) pair under `technique`, at most
/// [`EVALUATE_WORKERS`] units in flight.
///
/// Scenarios are resolved up front so a sweep value with no harvested events
/// fails the whole stage before any classification work starts.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_symbols(
    cache: &CandleCache,
    store: &dyn ScenarioStore,
    technique: Technique,
    algorithm: &str,
    interval: i64,
    resolution: i64,
    symbols: &[String],
    combos: &[ParamSet],
) -> Result<BTreeMap<String, Vec<ResultItem>>> {
    let start = Instant::now();

    // One unit per (symbol, combination), with its events already attached.
    let mut units: Vec<(&String, &ParamSet, Vec<crate::Event>)> = Vec::new();
    for symbol in symbols {
        let scenarios = store.load(algorithm, symbol)?;
        for combo in combos {
            let scenario = find_scenario(combo, &scenarios)?;
            units.push((symbol, combo, scenario.events.clone()));
        }
    }

    let pool = worker_pool(EVALUATE_WORKERS)?;
    let output: Mutex<BTreeMap<String, Vec<ResultItem>>> = Mutex::new(BTreeMap::new());

    pool.install(|| {
        units.par_iter().try_for_each(|(symbol, combo, events)| {
            let series = cache.get(interval, resolution, symbol)?;
            let metrics = technique.evaluate(&series, interval, events, combo)?;
            let item = ResultItem {
                config: EvalConfig {
                    name: algorithm.to_string(),
                    symbol: (*symbol).clone(),
                    options: (*combo).clone(),
                },
                result: metrics,
            };
            output
                .lock()
                .expect("evaluation results lock poisoned")
                .entry((*symbol).clone())
                .or_default()
                .push(item);
            Ok(())
        })
    })?;

    let output = output
        .into_inner()
        .expect("evaluation results lock poisoned");
    info!(
        algorithm,
        technique = technique.name(),
        symbols = symbols.len(),
        units = combos.len() * symbols.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "evaluation complete"
    );
    Ok(output)
}

// ============================================================
// AGGREGATION
// ============================================================

/// Fold per-symbol results into the two standard comparison tables:
/// threshold vs sensitivity range (pinned to [`DEFAULT_TIME_LIMIT`]) and
/// threshold vs time limit. Both come back sealed.
pub fn aggregate_tables(
    results_by_symbol: &BTreeMap<String, Vec<ResultItem>>,
    params: &EvalParams,
) -> Result<(MetricsTable, MetricsTable)> {
    let mut by_range: Grid<Metrics> =
        Grid::new(params.thresholds.len(), params.high_low_range.len());
    let mut by_limit: Grid<Metrics> = Grid::new(params.thresholds.len(), params.time_limits.len());
    let limits: Vec<f64> = params.time_limits.iter().map(|&t| t as f64).collect();

    for results in results_by_symbol.values() {
        let range_grid = build_grid(
            results,
            &params.thresholds,
            &params.high_low_range,
            |o| o.threshold,
            |o| o.params[0],
            |o| o.timeout == DEFAULT_TIME_LIMIT,
        )?;
        by_range.combine_with(&range_grid)?;

        let limit_grid = build_grid(
            results,
            &params.thresholds,
            &limits,
            |o| o.threshold,
            |o| o.timeout as f64,
            |_| true,
        )?;
        by_limit.combine_with(&limit_grid)?;
    }

    by_range.seal();
    by_limit.seal();

    Ok((
        MetricsTable {
            columns: params.range_labels(),
            rows: params.threshold_labels(),
            values: by_range,
        },
        MetricsTable {
            columns: params.limit_labels(),
            rows: params.threshold_labels(),
            values: by_limit,
        },
    ))
}

/// Fold every mid-band barrier result into per-year outcome rows.
///
/// Only results with a threshold in the 2-5% band at the default time limit
/// contribute. The fold is empty (and the output too) when nothing matched
/// or when the results came from the bucket technique.
pub fn fold_yearly(
    results_by_symbol: &BTreeMap<String, Vec<ResultItem>>,
) -> Result<Vec<crate::evaluators::barrier::YearRow>> {
    let mut folded: Option<Metrics> = None;
    for results in results_by_symbol.values() {
        for result in results {
            let options = &result.config.options;
            if options.threshold < YOY_THRESHOLDS.0 || options.threshold > YOY_THRESHOLDS.1 {
                continue;
            }
            if options.timeout != YOY_TIME_LIMIT {
                continue;
            }
            folded = Some(match folded {
                Some(m) => m.combine(&result.result)?,
                None => result.result.clone(),
            });
        }
    }
    match folded {
        Some(Metrics::Barrier(m)) => Ok(m.year_rows()),
        _ => Ok(Vec::new()),
    }
}

/// Tally harvested events per sensitivity value across all symbols.
pub fn count_events(
    store: &dyn ScenarioStore,
    algorithm: &str,
    symbols: &[String],
    sweep: &[f64],
) -> Result<Vec<(f64, usize)>> {
    let mut counts: Vec<(f64, usize)> = sweep.iter().map(|&v| (v, 0)).collect();
    for symbol in symbols {
        let scenarios = store.load(algorithm, symbol)?;
        for (value, count) in counts.iter_mut() {
            for scenario in &scenarios {
                if scenario.parameters.first() == Some(&*value) {
                    *count += scenario.events.len();
                }
            }
        }
    }
    Ok(counts)
}

/// Mean and sample standard deviation of `values`, each scaled by `scale`.
///
/// Used to annualize per-trade returns: `scale` is trades per year. Fewer
/// than two values have no spread; the deviation is reported as zero.
pub fn return_stats(values: &[f64], scale: f64) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().map(|v| v * scale).sum::<f64>() / values.len() as f64;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let sum_squared_diff: f64 = values
        .iter()
        .map(|v| {
            let diff = v * scale - mean;
            diff * diff
        })
        .sum();
    let variance = sum_squared_diff / (values.len() - 1) as f64;
    (mean, variance.sqrt())
}

// ============================================================
// TESTS
// ============================================================

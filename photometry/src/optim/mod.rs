//! Aperture-size optimization engine.
//!
//! Re-runs the full pipeline (builder, tracker, flux accumulation) for
//! a grid of candidate size factors in parallel workers, scores every
//! star with the noise metric, and keeps the per-star minimum. While
//! any star's optimum sits near the upper search bound the range is
//! shifted and widened; stars with a safely interior optimum are
//! pinned and skipped in later rounds. Circular apertures can get a
//! final fine-grained local search.

mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{error, info, warn};

use crate::config::{self, ApertureRule, Factor, RunConfig};
use crate::detect::CatalogStar;
use crate::error::{PhotometryError, Result};
use crate::frame::FrameSet;
use crate::noise::{NoiseMetric, UNRESOLVED_NOISE};

use worker::CandidateScore;

/// Factor assigned to stars whose every candidate scored NaN.
pub const DEFAULT_FACTOR: f64 = 1.0;

/// Smallest size value the fine-tune pass will probe.
const FINE_TUNE_FLOOR: f64 = 1e-3;

/// Best factor and minimum noise found per star.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub factors: HashMap<usize, f64>,
    pub noise: HashMap<usize, f64>,
}

/// Per-star running optimum.
#[derive(Debug, Clone, Copy)]
struct StarBest {
    factor: f64,
    noise: f64,
}

/// Coordinates the grid search over candidate aperture sizes.
pub struct Optimizer<'a> {
    config: &'a RunConfig,
    frames: &'a FrameSet,
    metric: &'a dyn NoiseMetric,
    catalog: Option<&'a [CatalogStar]>,
}

impl<'a> Optimizer<'a> {
    pub fn new(config: &'a RunConfig, frames: &'a FrameSet, metric: &'a dyn NoiseMetric) -> Self {
        Self {
            config,
            frames,
            metric,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: &'a [CatalogStar]) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Run the coarse search, the adaptive extension rounds, and the
    /// optional circular fine-tune.
    pub fn optimize(&self) -> Result<OptimizationResult> {
        let report = config::validate(self.config);
        if !report.is_ok() {
            return Err(PhotometryError::InvalidConfig(report.invalid.join("; ")));
        }
        for warning in &report.warnings {
            warn!("configuration: {warning}");
        }

        let search = &self.config.search;
        let step = search.step;
        let span = search.high - search.low;
        let (mut low, mut high) = (search.low, search.high);

        let values = value_grid(low, high, step);
        info!(
            "optimizing {} candidates in [{low}, {high}] with step {step}",
            values.len()
        );
        let scores = self.search_round(&uniform_candidates(&values), &[])?;
        let star_count = match scores.first() {
            Some(score) => score.noise.len(),
            None => {
                return Err(PhotometryError::InvalidConfig(
                    "search range produced no candidates".into(),
                ))
            }
        };
        let mut best = aggregate(&scores, star_count);

        let mut rounds = 0;
        loop {
            // stars safely away from the upper bound are done searching
            let pinned: Vec<usize> = best
                .iter()
                .enumerate()
                .filter(|(_, b)| b.factor < high - 2.0 * step)
                .map(|(id, _)| id)
                .collect();
            if pinned.len() == star_count {
                break;
            }
            if rounds >= search.max_extensions {
                warn!("reached the extension limit; last range [{low}, {high}]");
                break;
            }

            low = high - 2.0 * step;
            high = high + span - 2.0 * step;
            let mut values = value_grid(low, high, step);
            // size factors must stay positive; a narrow range can walk
            // the window down to zero, which ends the search instead
            values.retain(|v| *v > 0.0);
            if values.is_empty() {
                warn!("extension window [{low}, {high}] has no usable values");
                break;
            }
            info!(
                "extending the search to [{low}, {high}] ({} stars pinned)",
                pinned.len()
            );

            let scores = self.search_round(&uniform_candidates(&values), &pinned)?;
            merge_min(&mut best, &aggregate(&scores, star_count));
            rounds += 1;
        }

        if search.fine_tune_circle && self.config.aperture.uses(&ApertureRule::Circle) {
            let skip = self
                .config
                .aperture
                .owned_ids(&ApertureRule::Shape, star_count);
            let tuned = self.fine_tune(&best, &skip)?;
            merge_min(&mut best, &tuned);
        }

        for (id, b) in best.iter().enumerate() {
            info!("star {id} - factor {:.2} - noise {:.1} ppm", b.factor, b.noise);
        }

        Ok(OptimizationResult {
            factors: best.iter().enumerate().map(|(id, b)| (id, b.factor)).collect(),
            noise: best.iter().enumerate().map(|(id, b)| (id, b.noise)).collect(),
        })
    }

    /// Dense local re-search around each star's coarse optimum, for
    /// circular apertures only.
    fn fine_tune(&self, best: &[StarBest], skip: &[usize]) -> Result<Vec<StarBest>> {
        let search = &self.config.search;
        let points = search.fine_tune_points.max(2);
        info!(
            "fine-tuning circular apertures over {points} samples, span {}",
            search.fine_tune_span
        );

        let candidates: Vec<Factor> = (0..points)
            .map(|k| {
                let map = best
                    .iter()
                    .enumerate()
                    .map(|(id, b)| {
                        let start = b.factor - search.fine_tune_span;
                        let value = start
                            + 2.0 * search.fine_tune_span * k as f64 / (points - 1) as f64;
                        (id, value.max(FINE_TUNE_FLOOR))
                    })
                    .collect();
                Factor::PerStar(map)
            })
            .collect();

        let scores = self.search_round(&candidates, skip)?;
        Ok(aggregate(&scores, best.len()))
    }

    /// Partition candidates across workers and gather their scores.
    ///
    /// The first worker failure cancels the siblings and fails the
    /// round; no partial scores survive. Results are reassembled in
    /// candidate order so aggregation is deterministic regardless of
    /// worker scheduling.
    fn search_round(
        &self,
        candidates: &[Factor],
        disabled: &[usize],
    ) -> Result<Vec<CandidateScore>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let worker_count = self.config.search.max_workers.max(1).min(candidates.len());
        let chunks = split_evenly(candidates, worker_count);

        // candidate runs only ever need the first and latest mask
        let mut worker_config = self.config.clone();
        worker_config.low_memory = true;

        let cancel = AtomicBool::new(false);
        let (tx, rx) = crossbeam_channel::bounded(worker_count);

        let mut slots: Vec<Option<Vec<CandidateScore>>> = vec![None; worker_count];
        let mut failure: Option<PhotometryError> = None;

        thread::scope(|scope| {
            for (slot, &chunk) in chunks.iter().enumerate() {
                let tx = tx.clone();
                let cancel = &cancel;
                let worker_config = &worker_config;
                scope.spawn(move || {
                    let report = worker::evaluate_candidates(
                        self.frames,
                        worker_config,
                        self.metric,
                        self.catalog,
                        chunk,
                        disabled,
                        cancel,
                    );
                    let _ = tx.send((slot, report));
                });
            }
            drop(tx);

            for (slot, report) in rx.iter() {
                match report {
                    Ok(scores) => slots[slot] = Some(scores),
                    Err(e) => {
                        cancel.store(true, Ordering::Relaxed);
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }
        });

        if let Some(e) = failure {
            error!("optimization round failed: {e}");
            return Err(PhotometryError::WorkerFailed(e.to_string()));
        }
        Ok(slots.into_iter().flatten().flatten().collect())
    }
}

fn uniform_candidates(values: &[f64]) -> Vec<Factor> {
    values.iter().map(|&v| Factor::Uniform(v)).collect()
}

/// Inclusive value grid from `low` to `high` at `step`.
pub(crate) fn value_grid(low: f64, high: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut k = 0u32;
    loop {
        let value = low + f64::from(k) * step;
        if value > high + step * 1e-9 {
            break;
        }
        values.push(value);
        k += 1;
    }
    values
}

/// Per-star argmin over candidate scores, NaN entries excluded.
///
/// A star whose every candidate scored NaN is marked unresolved: it
/// gets the default factor and the sentinel noise value.
fn aggregate(scores: &[CandidateScore], star_count: usize) -> Vec<StarBest> {
    (0..star_count)
        .map(|id| {
            let mut best: Option<StarBest> = None;
            for score in scores {
                let noise = score.noise[id];
                if noise.is_nan() {
                    continue;
                }
                if best.map_or(true, |b| noise < b.noise) {
                    best = Some(StarBest {
                        factor: score.factors[id],
                        noise,
                    });
                }
            }
            best.unwrap_or_else(|| {
                warn!("star {id} has no finite noise value; marking unresolved");
                StarBest {
                    factor: DEFAULT_FACTOR,
                    noise: UNRESOLVED_NOISE,
                }
            })
        })
        .collect()
}

/// Fold a new round into the running optimum, star by star, never
/// regressing from a previously found better value.
fn merge_min(best: &mut [StarBest], update: &[StarBest]) {
    for (current, candidate) in best.iter_mut().zip(update) {
        if candidate.noise < current.noise {
            *current = *candidate;
        }
    }
}

/// Split candidates into `parts` nearly equal contiguous chunks; the
/// first `len % parts` chunks carry one extra candidate.
fn split_evenly<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let size = base + usize::from(part < extra);
        chunks.push(&items[start..start + size]);
        start += size;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn score(factors: Vec<f64>, noise: Vec<f64>) -> CandidateScore {
        CandidateScore { factors, noise }
    }

    #[test]
    fn test_value_grid_inclusive() {
        let values = value_grid(1.0, 4.0, 1.0);
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_value_grid_degenerate_range() {
        let values = value_grid(5.0, 5.0, 1.0);
        assert_eq!(values, vec![5.0]);
    }

    #[test]
    fn test_split_evenly() {
        let items: Vec<i32> = (0..7).collect();
        let chunks = split_evenly(&items, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], &[0, 1, 2]);
        assert_eq!(chunks[1], &[3, 4]);
        assert_eq!(chunks[2], &[5, 6]);
    }

    #[test]
    fn test_aggregate_excludes_nan() {
        let scores = vec![
            score(vec![1.0, 1.0], vec![50.0, f64::NAN]),
            score(vec![2.0, 2.0], vec![30.0, f64::NAN]),
            score(vec![3.0, 3.0], vec![40.0, f64::NAN]),
        ];
        let best = aggregate(&scores, 2);

        assert_relative_eq!(best[0].factor, 2.0);
        assert_relative_eq!(best[0].noise, 30.0);
        // all-NaN star falls back to the unresolved sentinel
        assert_relative_eq!(best[1].factor, DEFAULT_FACTOR);
        assert_relative_eq!(best[1].noise, UNRESOLVED_NOISE);
    }

    #[test]
    fn test_aggregation_is_associative_across_workers() {
        // two disjoint candidate maps, as two workers would return them
        let worker_a = vec![
            score(vec![1.0], vec![80.0]),
            score(vec![2.0], vec![20.0]),
        ];
        let worker_b = vec![
            score(vec![3.0], vec![60.0]),
            score(vec![4.0], vec![45.0]),
        ];

        let merged: Vec<CandidateScore> = worker_a
            .iter()
            .cloned()
            .chain(worker_b.iter().cloned())
            .collect();
        let direct = aggregate(&merged, 1);

        let mut stepwise = aggregate(&worker_a, 1);
        merge_min(&mut stepwise, &aggregate(&worker_b, 1));

        assert_relative_eq!(direct[0].factor, stepwise[0].factor);
        assert_relative_eq!(direct[0].noise, stepwise[0].noise);
    }

    #[test]
    fn test_merge_min_never_regresses() {
        let mut best = vec![StarBest {
            factor: 3.0,
            noise: 10.0,
        }];
        merge_min(
            &mut best,
            &[StarBest {
                factor: 9.0,
                noise: 50.0,
            }],
        );
        assert_relative_eq!(best[0].factor, 3.0);
        assert_relative_eq!(best[0].noise, 10.0);
    }
}

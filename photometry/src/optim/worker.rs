//! Candidate evaluation inside an optimization worker.
//!
//! Every worker owns its candidates outright: it rebuilds the full run
//! state (stars, masks, flux) per candidate from the shared read-only
//! frame set, so no two workers ever touch the same mutable state.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Factor, RunConfig};
use crate::detect::CatalogStar;
use crate::error::{PhotometryError, Result};
use crate::frame::FrameSet;
use crate::noise::{NoiseMetric, UNRESOLVED_NOISE};
use crate::pipeline::PhotometryRun;

/// Noise scores for one evaluated candidate.
///
/// Both vectors are indexed by star id; `factors` records the size
/// value each star was evaluated at, which differs per star during the
/// fine-tune pass.
#[derive(Debug, Clone)]
pub(crate) struct CandidateScore {
    pub factors: Vec<f64>,
    pub noise: Vec<f64>,
}

/// Evaluate a worker's assigned candidates sequentially.
///
/// Checks the cancellation token between candidates so a sibling
/// failure stops the pool promptly. Any pipeline error aborts the
/// whole worker; the coordinator treats that as fatal for the round.
pub(crate) fn evaluate_candidates(
    frames: &FrameSet,
    config: &RunConfig,
    metric: &dyn NoiseMetric,
    catalog: Option<&[CatalogStar]>,
    candidates: &[Factor],
    disabled: &[usize],
    cancel: &AtomicBool,
) -> Result<Vec<CandidateScore>> {
    let mut scores = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        if cancel.load(Ordering::Relaxed) {
            return Err(PhotometryError::WorkerFailed(
                "cancelled after a sibling failure".into(),
            ));
        }

        let mut run = PhotometryRun::new(config, frames);
        run.prepare(candidate, catalog)?;
        for &id in disabled {
            run.disable_star(id);
        }
        run.process()?;

        let star_count = run.stars().len();
        let factors = (0..star_count).map(|id| candidate.for_star(id)).collect();
        let noise = run
            .stars()
            .iter()
            .map(|star| {
                if !star.is_active() {
                    UNRESOLVED_NOISE
                } else if star.is_out_of_bounds() {
                    f64::NAN
                } else {
                    metric.evaluate(star.flux(), frames.timestamps())
                }
            })
            .collect();
        scores.push(CandidateScore { factors, noise });
    }

    Ok(scores)
}

//! Optimization-engine scenarios on synthetic ndarray frames.

use approx::assert_relative_eq;
use ndarray::Array2;
use photometry::{
    ApertureRule, CatalogStar, FrameSet, InitialDetection, MedianScatter, Optimizer,
    PhotometryError, RoleConfig, RunConfig, DEFAULT_FACTOR, UNRESOLVED_NOISE,
};

/// A motionless star: a 9x9 block of `value` centered at (30, 30).
fn quiet_frames(count: usize) -> Vec<Array2<f64>> {
    let mut base = Array2::<f64>::zeros((60, 60));
    for r in 26..=34 {
        for c in 26..=34 {
            base[[r, c]] = 100.0;
        }
    }
    vec![base; count]
}

/// The quiet star with pixels at distance 3 from its center flickering
/// between frames: apertures of radius 3 and larger pick up the
/// flicker, radius 2 and smaller stay clean.
fn flickering_ring_frames(count: usize) -> Vec<Array2<f64>> {
    quiet_frames(count)
        .into_iter()
        .enumerate()
        .map(|(index, mut image)| {
            let sign = if index % 2 == 0 { 1.0 } else { -1.0 };
            for (dr, dc) in [(3i64, 0i64), (-3, 0), (0, 3), (0, -3)] {
                let r = (30 + dr) as usize;
                let c = (30 + dc) as usize;
                image[[r, c]] += sign * 50.0;
            }
            image
        })
        .collect()
}

fn frame_set(images: Vec<Array2<f64>>) -> FrameSet {
    let count = images.len();
    let times = (0..count).map(|i| i as f64 * 1e-3).collect();
    FrameSet::new(images, vec![0.0; count], times, 1, false).unwrap()
}

#[test]
fn test_degenerate_range_returns_the_single_value() {
    let frames = frame_set(quiet_frames(6));
    let mut config = RunConfig::default();
    config.search.low = 4.0;
    config.search.high = 4.0;
    config.search.step = 1.0;
    config.search.max_workers = 2;

    let metric = MedianScatter::default();
    let result = Optimizer::new(&config, &frames, &metric).optimize().unwrap();

    assert_relative_eq!(result.factors[&0], 4.0);
}

#[test]
fn test_optimizer_prefers_the_quiet_aperture() {
    let frames = frame_set(flickering_ring_frames(20));
    let mut config = RunConfig::default();
    config.search.low = 1.0;
    config.search.high = 5.0;
    config.search.step = 1.0;
    // more workers than candidates: the pool clamps to the grid size
    config.search.max_workers = 8;

    let metric = MedianScatter::default();
    let result = Optimizer::new(&config, &frames, &metric).optimize().unwrap();

    // radii 1 and 2 are flicker-free and tie at zero noise; the
    // aggregation picks the earliest candidate of a tie
    assert_relative_eq!(result.factors[&0], 1.0);
    assert_relative_eq!(result.noise[&0], 0.0);
}

#[test]
fn test_range_extends_while_the_optimum_rides_the_bound() {
    // flicker at the star's center: every aperture sees the same
    // absolute wobble, so bigger apertures always score quieter and the
    // optimum chases the upper bound until the extension limit
    let images: Vec<Array2<f64>> = (0..20)
        .map(|index| {
            let mut image = Array2::<f64>::zeros((60, 60));
            for r in 0..60 {
                for c in 0..60 {
                    let dr = r as f64 - 30.0;
                    let dc = c as f64 - 30.0;
                    if dr * dr + dc * dc <= 144.0 {
                        image[[r, c]] = 100.0;
                    }
                }
            }
            let sign = if index % 2 == 0 { 1.0 } else { -1.0 };
            image[[30, 30]] += sign * 30.0;
            image
        })
        .collect();
    let frames = frame_set(images);

    let mut config = RunConfig::default();
    config.search.low = 1.0;
    config.search.high = 5.0;
    config.search.step = 1.0;
    config.search.max_workers = 3;
    config.search.max_extensions = 2;

    let metric = MedianScatter::default();
    let result = Optimizer::new(&config, &frames, &metric).optimize().unwrap();

    // two extension rounds push the probed range to [5, 9]
    assert_relative_eq!(result.factors[&0], 9.0);
    assert!(result.noise[&0] > 0.0);
    assert!(result.noise[&0] < UNRESOLVED_NOISE);
}

#[test]
fn test_star_with_no_finite_noise_is_unresolved() {
    // the star's own center is a dead pixel, so every candidate
    // aperture overlaps the forbidden region and scores NaN
    let mut images = quiet_frames(6);
    for image in &mut images {
        image[[30, 30]] = f64::NAN;
    }
    let frames = frame_set(images);

    let mut config = RunConfig::default();
    config.search.low = 1.0;
    config.search.high = 3.0;
    config.search.step = 1.0;
    config.search.max_workers = 2;
    config.search.max_extensions = 1;

    let metric = MedianScatter::default();
    let result = Optimizer::new(&config, &frames, &metric).optimize().unwrap();

    assert_relative_eq!(result.factors[&0], DEFAULT_FACTOR);
    assert_relative_eq!(result.noise[&0], UNRESOLVED_NOISE);
}

#[test]
fn test_worker_failure_is_fatal_for_the_round() {
    // catalog claims three stars, the frames only show two regions:
    // every candidate evaluation aborts in the builder
    let mut base = Array2::<f64>::zeros((60, 60));
    for (row, col) in [(30usize, 30usize), (10, 10)] {
        for r in row - 4..=row + 4 {
            for c in col - 4..=col + 4 {
                base[[r, c]] = 100.0;
            }
        }
    }
    let frames = frame_set(vec![base; 4]);

    let catalog = vec![
        CatalogStar {
            row: 30.0,
            col: 30.0,
            magnitude: 7.0,
        },
        CatalogStar {
            row: 10.0,
            col: 10.0,
            magnitude: 10.0,
        },
        CatalogStar {
            row: 50.0,
            col: 50.0,
            magnitude: 12.0,
        },
    ];

    let mut config = RunConfig::default();
    config.aperture = RoleConfig::both(ApertureRule::Shape);
    config.initial_detection = RoleConfig::both(InitialDetection::Catalog);
    config.search.low = 1.0;
    config.search.high = 4.0;
    config.search.step = 1.0;
    config.search.max_workers = 2;

    let metric = MedianScatter::default();
    let err = Optimizer::new(&config, &frames, &metric)
        .with_catalog(&catalog)
        .optimize()
        .unwrap_err();

    assert!(matches!(err, PhotometryError::WorkerFailed(_)));
}

#[test]
fn test_fine_tune_never_regresses_from_the_coarse_optimum() {
    let frames = frame_set(flickering_ring_frames(20));
    let mut config = RunConfig::default();
    config.search.low = 1.0;
    config.search.high = 5.0;
    config.search.step = 1.0;
    config.search.max_workers = 4;
    config.search.fine_tune_circle = true;
    config.search.fine_tune_span = 1.0;
    config.search.fine_tune_points = 5;

    let metric = MedianScatter::default();
    let result = Optimizer::new(&config, &frames, &metric).optimize().unwrap();

    // the fine pass ties the coarse zero-noise optimum and the merge
    // keeps the earlier value
    assert_relative_eq!(result.factors[&0], 1.0);
    assert_relative_eq!(result.noise[&0], 0.0);
}

#[test]
fn test_invalid_search_range_is_rejected_up_front() {
    let frames = frame_set(quiet_frames(3));
    let mut config = RunConfig::default();
    config.search.step = -1.0;

    let metric = MedianScatter::default();
    let err = Optimizer::new(&config, &frames, &metric)
        .optimize()
        .unwrap_err();
    assert!(matches!(err, PhotometryError::InvalidConfig(_)));
}

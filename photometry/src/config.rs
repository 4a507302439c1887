//! Run configuration and pre-flight validation.
//!
//! Every per-role knob (aperture rule, tracking mode, initial
//! detection) is assigned independently to the primary star and to the
//! set of secondary stars, so mixed setups like a circular primary
//! aperture over shape-detected secondaries are first-class.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Rule used to construct a star's frame-0 aperture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApertureRule {
    /// Fixed-radius circle around the star's initial position.
    Circle,
    /// Detected bright-region footprint, grown by the size factor.
    Shape,
}

/// Strategy producing a star's next position each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Rotate the frame-0 position by the accumulated roll angle.
    Static,
    /// Re-detect bright regions on the next frame and match them
    /// against rotation-predicted positions.
    Redetect,
    /// Derive positions from an externally supplied centroid-offset
    /// series.
    Offsets,
}

/// Source of the frame-0 star positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialDetection {
    /// Bright-region detection on the first frame.
    Image,
    /// Externally catalogued positions.
    Catalog,
}

/// Fallback applied when re-detection finds no bright regions at all.
///
/// Both behaviors existed in historical pipelines; neither is clearly
/// authoritative, so the choice is explicit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroRegionPolicy {
    /// Every star keeps its own rotation-predicted position.
    OwnPrediction,
    /// Every star adopts the primary star's predicted position.
    PrimaryPrediction,
}

/// Independent primary/secondary assignment of a per-role knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig<T> {
    /// Value for the central target star (always star id 0).
    pub primary: T,
    /// Value for every other tracked star.
    pub secondary: T,
}

impl<T: PartialEq> RoleConfig<T> {
    /// Same value for both roles.
    pub fn both(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            primary: value.clone(),
            secondary: value,
        }
    }

    /// Whether either role selects `value`.
    pub fn uses(&self, value: &T) -> bool {
        self.primary == *value || self.secondary == *value
    }

    /// Star ids served by `value`: the primary star is id 0,
    /// secondaries are every id after it.
    pub fn owned_ids(&self, value: &T, star_count: usize) -> Vec<usize> {
        let mut ids = Vec::new();
        if self.primary == *value {
            ids.push(0);
        }
        if self.secondary == *value {
            ids.extend(1..star_count);
        }
        ids
    }
}

/// Aperture size parameter: one shared value or a per-star mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Factor {
    Uniform(f64),
    PerStar(HashMap<usize, f64>),
}

impl Factor {
    /// Size value for a given star, falling back to 1.0 for ids absent
    /// from a per-star mapping.
    pub fn for_star(&self, id: usize) -> f64 {
        match self {
            Factor::Uniform(value) => *value,
            Factor::PerStar(map) => map.get(&id).copied().unwrap_or(1.0),
        }
    }
}

/// Grid-search settings for the optimization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Lower bound of the candidate size factors.
    pub low: f64,
    /// Upper bound of the candidate size factors.
    pub high: f64,
    /// Candidate spacing.
    pub step: f64,
    /// Upper bound on concurrently running workers.
    pub max_workers: usize,
    /// Maximum number of adaptive range-extension rounds.
    pub max_extensions: usize,
    /// Run the fine local search for circular apertures after the
    /// coarse search converges.
    pub fine_tune_circle: bool,
    /// Half-width of the fine search interval around each coarse
    /// optimum.
    pub fine_tune_span: f64,
    /// Number of samples across the fine search interval.
    pub fine_tune_points: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            low: 1.0,
            high: 20.0,
            step: 1.0,
            max_workers: 4,
            max_extensions: 10,
            fine_tune_circle: false,
            fine_tune_span: 1.0,
            fine_tune_points: 21,
        }
    }
}

/// Full configuration of a photometric run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Aperture construction rule per role.
    pub aperture: RoleConfig<ApertureRule>,
    /// Tracking mode per role.
    pub tracking: RoleConfig<TrackingMode>,
    /// Initial detection mode per role.
    pub initial_detection: RoleConfig<InitialDetection>,
    /// Working-grid multiplier (1 = native resolution); must be odd so
    /// that replicated pixel blocks have a center pixel.
    pub grid: u32,
    /// Retain only the first and latest aperture mask per star.
    pub low_memory: bool,
    /// Number of brightest-region peeling passes during region
    /// extraction, for separating blended neighbors.
    pub repeat_removal: usize,
    /// Tolerance (reference-grid pixels, scaled by the working grid)
    /// for matching re-detected centroids to predicted positions.
    pub match_tolerance_px: f64,
    /// Fallback when re-detection finds no regions in a frame.
    pub zero_region_policy: ZeroRegionPolicy,
    /// Optimization grid-search settings.
    pub search: SearchConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            aperture: RoleConfig::both(ApertureRule::Circle),
            tracking: RoleConfig::both(TrackingMode::Static),
            initial_detection: RoleConfig::both(InitialDetection::Image),
            grid: 1,
            low_memory: false,
            repeat_removal: 0,
            match_tolerance_px: 30.0,
            zero_region_policy: ZeroRegionPolicy::OwnPrediction,
            search: SearchConfig::default(),
        }
    }
}

/// Structured outcome of pre-flight validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Parameters with values the pipeline cannot run with.
    pub invalid: Vec<String>,
    /// Suspicious values worth flagging that do not block a run.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Validate a configuration before dispatching any work.
///
/// Callers are expected to consult the report and refuse to run on
/// invalid parameters rather than finding out mid-pipeline.
pub fn validate(config: &RunConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.grid % 2 == 0 {
        report
            .invalid
            .push(format!("grid: multiplier {} must be odd", config.grid));
    }

    let search = &config.search;
    if !(search.step > 0.0) {
        report
            .invalid
            .push(format!("search.step: {} must be positive", search.step));
    }
    if search.high < search.low {
        report.invalid.push(format!(
            "search range: [{}, {}] is inverted",
            search.low, search.high
        ));
    }
    if search.low <= 0.0 {
        report.invalid.push(format!(
            "search.low: {} must be positive (aperture factors are sizes)",
            search.low
        ));
    }
    if search.max_workers == 0 {
        report
            .invalid
            .push("search.max_workers: must be at least 1".to_string());
    }
    if search.fine_tune_circle {
        if !(search.fine_tune_span > 0.0) {
            report.invalid.push(format!(
                "search.fine_tune_span: {} must be positive",
                search.fine_tune_span
            ));
        }
        if search.fine_tune_points < 2 {
            report
                .invalid
                .push("search.fine_tune_points: need at least 2 samples".to_string());
        }
    }

    if !(config.match_tolerance_px > 0.0) {
        report.invalid.push(format!(
            "match_tolerance_px: {} must be positive",
            config.match_tolerance_px
        ));
    }

    if config.repeat_removal > 10 {
        report.warnings.push(format!(
            "repeat_removal: {} peeling passes is unusually many",
            config.repeat_removal
        ));
    }
    if search.max_extensions == 0 {
        report
            .warnings
            .push("search.max_extensions: range will never extend".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_config_ownership() {
        let roles = RoleConfig {
            primary: ApertureRule::Circle,
            secondary: ApertureRule::Shape,
        };

        assert_eq!(roles.owned_ids(&ApertureRule::Circle, 4), vec![0]);
        assert_eq!(roles.owned_ids(&ApertureRule::Shape, 4), vec![1, 2, 3]);
        assert!(roles.uses(&ApertureRule::Circle));
        assert!(roles.uses(&ApertureRule::Shape));

        let uniform = RoleConfig::both(ApertureRule::Circle);
        assert_eq!(uniform.owned_ids(&ApertureRule::Circle, 3), vec![0, 1, 2]);
        assert!(!uniform.uses(&ApertureRule::Shape));
    }

    #[test]
    fn test_factor_lookup() {
        let uniform = Factor::Uniform(5.0);
        assert_eq!(uniform.for_star(0), 5.0);
        assert_eq!(uniform.for_star(7), 5.0);

        let mut map = HashMap::new();
        map.insert(0usize, 3.0);
        map.insert(1usize, 8.0);
        let per_star = Factor::PerStar(map);
        assert_eq!(per_star.for_star(1), 8.0);
        assert_eq!(per_star.for_star(9), 1.0);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let report = validate(&RunConfig::default());
        assert!(report.is_ok(), "unexpected: {:?}", report.invalid);
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut config = RunConfig::default();
        config.grid = 2;
        config.search.step = 0.0;
        config.search.low = 5.0;
        config.search.high = 1.0;
        config.search.max_workers = 0;

        let report = validate(&config);
        assert!(!report.is_ok());
        assert_eq!(report.invalid.len(), 4);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = RunConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.grid, config.grid);
        assert_eq!(parsed.aperture.primary, ApertureRule::Circle);
        assert_eq!(parsed.zero_region_policy, ZeroRegionPolicy::OwnPrediction);
    }
}

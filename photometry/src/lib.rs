//! Aperture photometry and multi-star tracking for space telescope
//! image sequences.
//!
//! The crate follows the photometric aperture ("mask") of a target star
//! and its background neighbors across a time-ordered frame sequence,
//! accumulates per-star flux, and tunes each aperture's size to
//! minimize a noise metric.
//!
//! # Architecture
//!
//! - [`aperture`] owns the per-star mask sequence and builds frame-0
//!   masks from a circular rule or a detected bright-region rule, with
//!   a boundary-clamped dilation operator.
//! - [`track`] predicts each star's next position from static field
//!   rotation, bright-region re-detection, or an external centroid
//!   series, independently per role.
//! - [`validator`] tallies frames where a mask overlaps invalid sensor
//!   pixels.
//! - [`pipeline`] runs one full pass: build, track, accumulate flux.
//! - [`optim`] drives repeated pipeline runs over a grid of candidate
//!   aperture sizes in parallel workers, with adaptive range extension
//!   and a circular fine-tune pass.
//!
//! File I/O, plotting, and configuration loading live with the callers;
//! this crate works on [`frame::FrameSet`] inputs and emits
//! [`pipeline::RunSummary`] outputs.

pub mod aperture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod grid;
pub mod noise;
pub mod optim;
pub mod pipeline;
pub mod star;
pub mod track;
pub mod validator;

pub use aperture::ApertureMasks;
pub use config::{
    ApertureRule, Factor, InitialDetection, RoleConfig, RunConfig, SearchConfig, TrackingMode,
    ValidationReport, ZeroRegionPolicy,
};
pub use detect::CatalogStar;
pub use error::PhotometryError;
pub use frame::{CentroidOffset, FrameSet};
pub use grid::PixelPos;
pub use noise::{MedianScatter, NoiseMetric, UNRESOLVED_NOISE};
pub use optim::{OptimizationResult, Optimizer, DEFAULT_FACTOR};
pub use pipeline::{PhotometryRun, RunSummary, StarSummary, UncertaintyParams};
pub use star::{Star, StarField};
pub use track::Tracker;

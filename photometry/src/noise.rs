//! Noise scoring of flux series.
//!
//! The optimizer treats the noise metric as an opaque scoring function:
//! anything that maps a flux series and its timestamps to a scalar
//! (lower is better) plugs in through [`NoiseMetric`].

use log::error;

/// Noise value assigned to stars the optimizer could not resolve.
pub const UNRESOLVED_NOISE: f64 = 2e7;

/// Scalar noise score for a flux series; lower is better.
pub trait NoiseMetric: Send + Sync {
    fn evaluate(&self, flux: &[f64], time: &[f64]) -> f64;
}

/// Running median-scatter estimator, in parts per million.
///
/// The median-normalized series is cut into windows; each window scores
/// its standard deviation over the square root of the window length,
/// and the median of those scores is reported. Optionally clips
/// 5-MAD outliers from the normalized series first.
#[derive(Debug, Clone)]
pub struct MedianScatter {
    /// Window length in cadences.
    pub window: usize,
    /// Remove 5-MAD outliers before scoring.
    pub clip_outliers: bool,
}

impl Default for MedianScatter {
    fn default() -> Self {
        Self {
            window: 30,
            clip_outliers: true,
        }
    }
}

impl NoiseMetric for MedianScatter {
    fn evaluate(&self, flux: &[f64], _time: &[f64]) -> f64 {
        if flux.is_empty() {
            error!("no flux values provided");
            return f64::NAN;
        }

        let median = nanmedian(flux);
        if !median.is_finite() || median == 0.0 {
            return f64::NAN;
        }
        let mut series: Vec<f64> = flux.iter().map(|&f| f / median).collect();

        if self.clip_outliers {
            let center = nanmedian(&series);
            let deviations: Vec<f64> = series.iter().map(|v| (v - center).abs()).collect();
            let mad = 1.4826 * nanmedian(&deviations);
            if mad > 0.0 {
                series.retain(|v| (v - center).abs() <= 5.0 * mad);
            }
        }

        let window = self.window.max(1);
        let scores: Vec<f64> = chunks(&series, window)
            .into_iter()
            .map(|chunk| std_dev(chunk) / (window as f64).sqrt())
            .collect();
        if scores.is_empty() {
            return f64::NAN;
        }
        1.0e6 * nanmedian(&scores)
    }
}

/// Split a series into consecutive windows; the final window absorbs
/// the tail rather than leaving a short remainder.
fn chunks(series: &[f64], window: usize) -> Vec<&[f64]> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < series.len() {
        if start + 2 * window <= series.len() {
            out.push(&series[start..start + window]);
            start += window;
        } else {
            out.push(&series[start..]);
            break;
        }
    }
    out
}

fn nanmedian(values: &[f64]) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        (finite[mid - 1] + finite[mid]) / 2.0
    } else {
        finite[mid]
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

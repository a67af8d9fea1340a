use itertools::Itertools;
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::math::{linear_fit, noise_level, stability_ratio};
use crate::trace::{PeakRegion, SweepHalf};

/// A window of one sweep half which is well described by a straight line
///
/// Indices are global indices into the scan and inclusive at both ends. `voltage_start` and
/// `voltage_end` are the potentials at `start_idx` and `end_idx`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Segment {
    pub start_idx: usize,
    pub end_idx: usize,
    /// Slope of current against voltage in µA/V
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub stability_ratio: f64,
    pub voltage_start: f64,
    pub voltage_end: f64,
    pub mean_current: f64,
    /// Number of samples in the window
    pub length: usize,
}

impl Segment {
    pub fn center_voltage(&self) -> f64 {
        (self.voltage_start + self.voltage_end) / 2.0
    }

    pub const fn center_idx(&self) -> usize {
        (self.start_idx + self.end_idx) / 2
    }
}

/// The voltage span of a scanning window for a half covering `voltage_range` volts
#[allow(clippy::cast_precision_loss)]
pub fn window_span(voltage_range: f64, config: &ScannerConfig) -> f64 {
    (voltage_range / config.target_windows as f64)
        .clamp(config.min_window_span, config.max_window_span)
}

/// Start voltages of the windows slid across a half spanning `v_lo..=v_hi` volts
///
/// Never more than `max_windows` long: for very wide or very finely sampled sweeps the step is
/// widened instead. Empty when the range is degenerate.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn window_starts(v_lo: f64, v_hi: f64, config: &ScannerConfig) -> Vec<f64> {
    let range = v_hi - v_lo;
    if !(range.is_finite() && range > 0.0) {
        return vec![];
    }

    let span = window_span(range, config);
    let step = (config.step_fraction * span).max(range / config.max_windows as f64);
    let tolerance = config.tolerance_fraction * span;

    let positions = if span >= range {
        1
    } else {
        ((range - span) / step + 1e-9).floor() as usize + 1
    };
    let mut starts = (0..positions.min(config.max_windows))
        .map(|k| step.mul_add(k as f64, v_lo))
        .collect::<Vec<_>>();
    // Align a final window with the top of the range when the grid falls short of it
    if let Some(&last) = starts.last() {
        if last + span < v_hi - tolerance && starts.len() < config.max_windows {
            starts.push(v_hi - span);
        }
    }
    starts
}

/// Slide overlapping voltage windows across `half`, keeping windows that fit a line well
///
/// Windows whose index range touches any of `regions` are skipped, as are the samples in the
/// first and last `edge_exclusion` fraction of the half. A window fits well when its R² reaches
/// `min_r2`, or when its residuals are no larger than the noise of the half allows, so that flat
/// but noisy background is not lost. The returned segments are ordered by their first index.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn scan(half: &SweepHalf<'_>, regions: &[PeakRegion], config: &ScannerConfig) -> Vec<Segment> {
    let Some((v_lo, v_hi)) = voltage_bounds(half.voltage) else {
        return vec![];
    };
    let starts = window_starts(v_lo, v_hi, config);
    if starts.is_empty() {
        log::debug!("{} half has no voltage range to scan", half.direction);
        return vec![];
    }

    let span = window_span(v_hi - v_lo, config);
    let tolerance = config.tolerance_fraction * span;
    let noise = noise_level(half.current).unwrap_or(0.0);

    let skip = (half.len() as f64 * config.edge_exclusion).floor() as usize;
    let usable = skip..half.len().saturating_sub(skip);

    let mut segments = starts
        .iter()
        .filter_map(|&start| {
            let lo = start - tolerance;
            let hi = start + span + tolerance;
            let mut indices = usable
                .clone()
                .filter(|&ii| (lo..=hi).contains(&half.voltage[ii]))
                .collect::<Vec<_>>();

            if indices.len() > config.max_points {
                let excess = indices.len() - config.max_points;
                let front = excess / 2;
                indices = indices[front..front + config.max_points].to_vec();
            }
            if indices.len() < config.min_points {
                return None;
            }

            let (first, last) = (indices[0], indices[indices.len() - 1]);
            let (start_idx, end_idx) = (half.global(first), half.global(last));
            if regions
                .iter()
                .any(|region| region.overlaps(start_idx, end_idx))
            {
                return None;
            }

            fit_window(half, &indices, noise, config)
        })
        .collect::<Vec<_>>();

    segments.sort_by_key(|segment| (segment.start_idx, segment.end_idx));
    segments.dedup_by_key(|segment| (segment.start_idx, segment.end_idx));

    log::debug!(
        "{} half: examined {} windows of {:.4} V, accepted {} segments",
        half.direction,
        starts.len(),
        span,
        segments.len()
    );

    segments
}

fn voltage_bounds(voltage: &[f64]) -> Option<(f64, f64)> {
    match voltage.iter().minmax_by(|a, b| a.total_cmp(b)) {
        itertools::MinMaxResult::NoElements => None,
        itertools::MinMaxResult::OneElement(&v) => Some((v, v)),
        itertools::MinMaxResult::MinMax(&lo, &hi) => Some((lo, hi)),
    }
}

/// Fit the samples at local `indices`, returning a segment if it passes the quality gates
#[allow(clippy::cast_precision_loss)]
fn fit_window(
    half: &SweepHalf<'_>,
    indices: &[usize],
    noise: f64,
    config: &ScannerConfig,
) -> Option<Segment> {
    let voltage = indices.iter().map(|&ii| half.voltage[ii]).collect::<Vec<_>>();
    let current = indices.iter().map(|&ii| half.current[ii]).collect::<Vec<_>>();

    let fit = linear_fit(&voltage, &current)?;
    let stability_ratio = stability_ratio(&current);

    let within_noise = fit.rmse <= config.noise_tolerance * noise;
    if (fit.r2 < config.min_r2 && !within_noise)
        || fit.slope.abs() > config.max_abs_slope
        || stability_ratio > config.max_stability_ratio
    {
        return None;
    }

    let (first, last) = (indices[0], indices[indices.len() - 1]);
    Some(Segment {
        start_idx: half.global(first),
        end_idx: half.global(last),
        slope: fit.slope,
        intercept: fit.intercept,
        r2: fit.r2,
        stability_ratio,
        voltage_start: half.voltage[first],
        voltage_end: half.voltage[last],
        mean_current: current.iter().sum::<f64>() / current.len() as f64,
        length: indices.len(),
    })
}

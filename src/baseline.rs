use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

use crate::config::{BaselineConfig, DetectorConfig};
use crate::math::weighted_mean;
use crate::scoring::{SegmentGroup, SegmentSummary};
use crate::segment;
use crate::trace::{PeakRegion, SweepDirection, SweepHalf};
use crate::{Error, Result};

/// A baseline built from the winning segment group of one half
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedBaseline {
    /// Background current at every sample of the half
    pub baseline: Vec<f64>,
    pub group: SegmentGroup,
}

/// Run the scan, group and synthesis stages for one half
///
/// # Errors
/// - [`Error::InsufficientData`] if the half is too short to hold a single window
/// - [`Error::NoSegmentFound`] if no window passes the quality gates, or every group is too long
pub fn detect(
    half: &SweepHalf<'_>,
    regions: &[PeakRegion],
    config: &DetectorConfig,
) -> Result<DetectedBaseline> {
    if half.len() < config.scanner.min_points {
        return Err(Error::InsufficientData {
            required: config.scanner.min_points,
            actual: half.len(),
        });
    }

    let segments = segment::scan(half, regions, &config.scanner);
    let group = config
        .scoring
        .select(&segments, half, regions)
        .ok_or(Error::NoSegmentFound(half.direction))?;
    let baseline = synthesize(&group, half.voltage, &config.baseline);

    Ok(DetectedBaseline { baseline, group })
}

/// Turn a segment group into a background current for every potential in `voltage`
///
/// Each segment is represented by its mean current, weighted by fit quality and length. If the
/// representatives agree to within `flat_spread`, or there is only one, the baseline is their
/// weighted mean. Otherwise the baseline follows the line through the lowest and highest
/// representatives, clamped to the range between them, which follows slow drift without adding
/// structure of its own.
#[allow(clippy::cast_precision_loss)]
pub fn synthesize(group: &SegmentGroup, voltage: &[f64], config: &BaselineConfig) -> Vec<f64> {
    let representatives = group
        .segments
        .iter()
        .map(|s| s.mean_current)
        .collect::<Vec<_>>();
    let weights = group
        .segments
        .iter()
        .map(|s| s.r2 * s.length as f64)
        .collect::<Vec<_>>();

    let level = weighted_mean(&representatives, &weights).unwrap_or_else(|| {
        representatives.iter().sum::<f64>() / representatives.len().max(1) as f64
    });

    let (low, high) = match group
        .segments
        .iter()
        .minmax_by(|a, b| a.mean_current.total_cmp(&b.mean_current))
    {
        MinMaxResult::MinMax(low, high) => (low, high),
        MinMaxResult::NoElements | MinMaxResult::OneElement(_) => {
            return vec![level; voltage.len()];
        }
    };

    let spread = high.mean_current - low.mean_current;
    let run = high.center_voltage() - low.center_voltage();
    if spread < config.flat_spread || run.abs() <= f64::EPSILON {
        return vec![level; voltage.len()];
    }

    let slope = spread / run;
    voltage
        .iter()
        .map(|&v| {
            slope
                .mul_add(v - low.center_voltage(), low.mean_current)
                .clamp(low.mean_current, high.mean_current)
        })
        .collect()
}

/// Constant baseline from the mean current at the outer end of a half
///
/// The forward half is averaged over its first `fallback_fraction`, the reverse half over its
/// last, keeping away from the turning point.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn fallback(half: &SweepHalf<'_>, config: &BaselineConfig) -> Vec<f64> {
    if half.is_empty() {
        return vec![];
    }
    let count = ((half.len() as f64 * config.fallback_fraction).ceil() as usize).clamp(1, half.len());
    let window = match half.direction {
        SweepDirection::Forward => &half.current[..count],
        SweepDirection::Reverse => &half.current[half.len() - count..],
    };
    let level = window.iter().sum::<f64>() / count as f64;
    vec![level; half.len()]
}

/// Whether a half's baseline came from detected segments or from the fallback
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum BaselineStatus {
    Detected,
    Fallback(String),
}

/// The baseline of one half, together with how it was obtained
#[derive(Clone, Debug, PartialEq)]
pub enum BaselineOutcome {
    Detected(DetectedBaseline),
    Fallback { baseline: Vec<f64>, reason: String },
}

impl BaselineOutcome {
    /// Substitute the fallback baseline for `half`, recording why
    pub fn fallback(half: &SweepHalf<'_>, config: &BaselineConfig, reason: &Error) -> Self {
        Self::Fallback {
            baseline: fallback(half, config),
            reason: reason.to_string(),
        }
    }

    pub fn baseline(&self) -> &[f64] {
        match self {
            Self::Detected(detected) => &detected.baseline,
            Self::Fallback { baseline, .. } => baseline,
        }
    }

    pub fn summary(&self) -> Option<SegmentSummary> {
        match self {
            Self::Detected(detected) => Some(detected.group.summary()),
            Self::Fallback { .. } => None,
        }
    }

    pub fn status(&self) -> BaselineStatus {
        match self {
            Self::Detected(_) => BaselineStatus::Detected,
            Self::Fallback { reason, .. } => BaselineStatus::Fallback(reason.clone()),
        }
    }

    pub fn into_baseline(self) -> Vec<f64> {
        match self {
            Self::Detected(detected) => detected.baseline,
            Self::Fallback { baseline, .. } => baseline,
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PeakConfig;
use crate::trace::{PeakRegion, ScanTrace, SweepHalf};

/// Direction of the current excursion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakKind {
    /// Anodic, a positive excursion
    Oxidation,
    /// Cathodic, a negative excursion
    Reduction,
}

impl fmt::Display for PeakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oxidation => write!(f, "oxidation"),
            Self::Reduction => write!(f, "reduction"),
        }
    }
}

/// A local current excursion, before any comparison with the baseline
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakCandidate {
    /// Global sample index of the apex
    pub index: usize,
    pub voltage: f64,
    pub current: f64,
    pub kind: PeakKind,
    /// Prominence relative to the largest absolute current in the scan
    pub prominence: f64,
    /// Width at half prominence, in samples
    pub width: f64,
}

/// A local maximum of a one-dimensional signal
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalMaximum {
    pub index: usize,
    pub prominence: f64,
    pub width: f64,
}

/// Find the local maxima of `signal` at least `min_prominence` high and `min_width` samples wide
///
/// A flat-topped maximum is reported at the middle of its plateau. The end points of the signal
/// are never maxima. Prominence is measured from the higher of the two lowest points reached on
/// either side before the signal climbs above the peak again (or ends). Width is measured at half
/// the prominence, interpolating linearly between samples.
pub fn find_maxima(signal: &[f64], min_prominence: f64, min_width: f64) -> Vec<LocalMaximum> {
    local_maxima(signal)
        .into_iter()
        .filter_map(|index| {
            let (prominence, left_base, right_base) = prominence(signal, index);
            if !(prominence >= min_prominence) {
                return None;
            }
            let width = width(signal, index, prominence, left_base, right_base);
            (width >= min_width).then_some(LocalMaximum {
                index,
                prominence,
                width,
            })
        })
        .collect()
}

fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let mut maxima = vec![];
    if signal.len() < 3 {
        return maxima;
    }
    let last = signal.len() - 1;
    let mut ii = 1;
    while ii < last {
        if signal[ii - 1] < signal[ii] {
            let mut ahead = ii + 1;
            while ahead < last && signal[ahead] == signal[ii] {
                ahead += 1;
            }
            if signal[ahead] < signal[ii] {
                maxima.push((ii + ahead - 1) / 2);
                ii = ahead;
            }
        }
        ii += 1;
    }
    maxima
}

fn prominence(signal: &[f64], peak: usize) -> (f64, usize, usize) {
    let apex = signal[peak];

    let mut left_min = apex;
    let mut left_base = peak;
    let mut ii = peak;
    loop {
        if signal[ii] > apex {
            break;
        }
        if signal[ii] < left_min {
            left_min = signal[ii];
            left_base = ii;
        }
        if ii == 0 {
            break;
        }
        ii -= 1;
    }

    let mut right_min = apex;
    let mut right_base = peak;
    for (jj, &value) in signal.iter().enumerate().skip(peak) {
        if value > apex {
            break;
        }
        if value < right_min {
            right_min = value;
            right_base = jj;
        }
    }

    (apex - left_min.max(right_min), left_base, right_base)
}

#[allow(clippy::cast_precision_loss)]
fn width(signal: &[f64], peak: usize, prominence: f64, left_base: usize, right_base: usize) -> f64 {
    let height = signal[peak] - prominence / 2.0;

    let mut ii = peak;
    while left_base < ii && height < signal[ii] {
        ii -= 1;
    }
    let mut left = ii as f64;
    if signal[ii] < height && ii < peak {
        left += (height - signal[ii]) / (signal[ii + 1] - signal[ii]);
    }

    let mut jj = peak;
    while jj < right_base && height < signal[jj] {
        jj += 1;
    }
    let mut right = jj as f64;
    if signal[jj] < height && jj > peak {
        right -= (height - signal[jj]) / (signal[jj - 1] - signal[jj]);
    }

    right - left
}

/// Find oxidation and reduction candidates across the whole scan
///
/// The current is scaled by its largest magnitude so that `min_prominence` is relative. Oxidation
/// candidates are maxima of the scaled current, reduction candidates maxima of its negation.
/// The result is ordered by index.
pub fn detect(trace: &ScanTrace, min_prominence: f64, min_width: f64) -> Vec<PeakCandidate> {
    let candidates = candidates_in(
        trace.voltage(),
        trace.current(),
        0,
        min_prominence,
        min_width,
    );
    log::debug!("found {} peak candidates", candidates.len());
    candidates
}

/// Candidates among `voltage`/`current`, with indices shifted by `offset`
fn candidates_in(
    voltage: &[f64],
    current: &[f64],
    offset: usize,
    min_prominence: f64,
    min_width: f64,
) -> Vec<PeakCandidate> {
    let scale = current
        .iter()
        .fold(0.0f64, |acc, current| acc.max(current.abs()));
    if !(scale > 0.0) {
        return vec![];
    }

    let normalized = current.iter().map(|i| i / scale).collect::<Vec<_>>();
    let negated = normalized.iter().map(|value| -value).collect::<Vec<_>>();

    let candidate = |kind: PeakKind| {
        move |maximum: LocalMaximum| PeakCandidate {
            index: offset + maximum.index,
            voltage: voltage[maximum.index],
            current: current[maximum.index],
            kind,
            prominence: maximum.prominence,
            width: maximum.width,
        }
    };

    let mut candidates = find_maxima(&normalized, min_prominence, min_width)
        .into_iter()
        .map(candidate(PeakKind::Oxidation))
        .chain(
            find_maxima(&negated, min_prominence, min_width)
                .into_iter()
                .map(candidate(PeakKind::Reduction)),
        )
        .collect::<Vec<_>>();
    candidates.sort_by_key(|candidate| candidate.index);
    candidates
}

/// Regions around `candidates` the baseline search must avoid
///
/// Each region reaches `region_width_factor` peak widths plus `region_margin` samples either side
/// of the apex, but never more than `max_reach` samples, clamped to the scan.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn exclusion_regions(
    candidates: &[PeakCandidate],
    num_samples: usize,
    max_reach: usize,
    config: &PeakConfig,
) -> Vec<PeakRegion> {
    if num_samples == 0 {
        return vec![];
    }
    candidates
        .iter()
        .map(|candidate| {
            let reach = ((config.region_width_factor * candidate.width).ceil().max(0.0) as usize
                + config.region_margin)
                .min(max_reach);
            PeakRegion::new(
                candidate.index.saturating_sub(reach),
                (candidate.index + reach).min(num_samples - 1),
            )
        })
        .collect()
}

/// Quick, loose candidate search used only to keep the baseline search clear of peaks
///
/// Each half is searched on its own, so the turning point is an end of the signal rather than a
/// corner that could pass for a peak. Candidates wider than `prescan_max_width` of their half are
/// background curvature, not peaks, and are left out.
pub fn prescan(trace: &ScanTrace, config: &PeakConfig) -> Vec<PeakRegion> {
    let regions = [trace.forward(), trace.reverse()]
        .iter()
        .flat_map(|half| prescan_half(half, trace.len(), config))
        .collect::<Vec<_>>();
    log::debug!("pre-scan excluded {} regions", regions.len());
    regions
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn prescan_half(half: &SweepHalf<'_>, num_samples: usize, config: &PeakConfig) -> Vec<PeakRegion> {
    let num_half = half.len() as f64;
    let candidates = candidates_in(
        half.voltage,
        half.current,
        half.offset,
        config.prescan_prominence,
        config.min_width,
    )
    .into_iter()
    .filter(|candidate| candidate.width <= config.prescan_max_width * num_half)
    .collect::<Vec<_>>();
    let max_reach = (config.region_max_reach * num_half).ceil() as usize;
    exclusion_regions(&candidates, num_samples, max_reach, config)
}

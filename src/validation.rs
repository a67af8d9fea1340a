use std::fmt;

use serde::Serialize;

use crate::config::{PeakConfig, VoltageZone, VoltageZones};
use crate::math::noise_level;
use crate::peaks::{PeakCandidate, PeakKind};
use crate::trace::ScanTrace;

/// Why a candidate was not accepted as a peak
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RejectionReason {
    OutsideVoltageZone {
        kind: PeakKind,
        voltage: f64,
        zone: VoltageZone,
    },
    WrongSign { kind: PeakKind, current: f64 },
    BelowNoiseFloor { height: f64, threshold: f64 },
    CrossZone { kind: PeakKind, voltage: f64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutsideVoltageZone {
                kind,
                voltage,
                zone,
            } => write!(
                f,
                "voltage-zone rule: {kind} peak at {voltage:.3} V lies outside [{:.3}, {:.3}] V",
                zone.min, zone.max
            ),
            Self::WrongSign { kind, current } => write!(
                f,
                "sign rule: {kind} peak current {current:.3} µA has the wrong sign"
            ),
            Self::BelowNoiseFloor { height, threshold } => write!(
                f,
                "minimum-height rule: height {height:.3} µA does not exceed {threshold:.3} µA"
            ),
            Self::CrossZone { kind, voltage } => write!(
                f,
                "cross-zone rule: {kind} peak at {voltage:.3} V lies inside the {} zone",
                opposite(*kind)
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum PeakOutcome {
    Accepted,
    Rejected(RejectionReason),
}

/// A candidate after comparison with the baseline
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ValidatedPeak {
    pub candidate: PeakCandidate,
    /// Height above baseline in µA, signed for oxidation and absolute for reduction
    pub height: f64,
    /// Between zero and one, zero for rejected candidates
    pub confidence: f64,
    pub outcome: PeakOutcome,
}

impl ValidatedPeak {
    pub const fn is_accepted(&self) -> bool {
        matches!(self.outcome, PeakOutcome::Accepted)
    }
}

/// The baselines of both halves, addressed by global sample index
#[derive(Clone, Copy, Debug)]
pub struct BaselinePair<'a> {
    pub forward: &'a [f64],
    pub reverse: &'a [f64],
}

impl BaselinePair<'_> {
    pub fn at(&self, index: usize) -> Option<f64> {
        match index.checked_sub(self.forward.len()) {
            None => self.forward.get(index).copied(),
            Some(local) => self.reverse.get(local).copied(),
        }
    }
}

const fn opposite(kind: PeakKind) -> PeakKind {
    match kind {
        PeakKind::Oxidation => PeakKind::Reduction,
        PeakKind::Reduction => PeakKind::Oxidation,
    }
}

const fn zone_for(zones: &VoltageZones, kind: PeakKind) -> &VoltageZone {
    match kind {
        PeakKind::Oxidation => &zones.oxidation,
        PeakKind::Reduction => &zones.reduction,
    }
}

/// Check every candidate against the zone, sign, minimum-height and cross-zone rules in turn
///
/// The first rule a candidate fails decides its rejection. Candidates whose index has no
/// baseline are dropped.
pub fn validate(
    candidates: &[PeakCandidate],
    trace: &ScanTrace,
    baselines: &BaselinePair<'_>,
    zones: &VoltageZones,
    config: &PeakConfig,
) -> Vec<ValidatedPeak> {
    let noise = noise_level(trace.current()).unwrap_or(0.0);
    let threshold = config.min_height.max(config.noise_multiplier * noise);
    log::debug!("peak height threshold {threshold:.4} µA from noise {noise:.4} µA");

    candidates
        .iter()
        .filter_map(|candidate| {
            let Some(baseline) = baselines.at(candidate.index) else {
                log::debug!("dropping candidate at {} with no baseline", candidate.index);
                return None;
            };
            let excursion = candidate.current - baseline;
            let height = match candidate.kind {
                PeakKind::Oxidation => excursion,
                PeakKind::Reduction => excursion.abs(),
            };

            let outcome = match check(candidate, excursion.abs(), threshold, zones) {
                Some(reason) => {
                    log::debug!("rejected candidate at {:.3} V: {reason}", candidate.voltage);
                    PeakOutcome::Rejected(reason)
                }
                None => PeakOutcome::Accepted,
            };
            let confidence = match outcome {
                PeakOutcome::Accepted => confidence(candidate, height, trace, zones, config),
                PeakOutcome::Rejected(_) => 0.0,
            };

            Some(ValidatedPeak {
                candidate: *candidate,
                height,
                confidence,
                outcome,
            })
        })
        .collect()
}

fn check(
    candidate: &PeakCandidate,
    magnitude: f64,
    threshold: f64,
    zones: &VoltageZones,
) -> Option<RejectionReason> {
    let PeakCandidate {
        kind,
        voltage,
        current,
        ..
    } = *candidate;

    let zone = zone_for(zones, kind);
    if !zone.contains(voltage) {
        return Some(RejectionReason::OutsideVoltageZone {
            kind,
            voltage,
            zone: *zone,
        });
    }

    let signed_correctly = match kind {
        PeakKind::Oxidation => current > 0.0,
        PeakKind::Reduction => current < 0.0,
    };
    if !signed_correctly {
        return Some(RejectionReason::WrongSign { kind, current });
    }

    if !(magnitude > threshold) {
        return Some(RejectionReason::BelowNoiseFloor {
            height: magnitude,
            threshold,
        });
    }

    if zone_for(zones, opposite(kind)).contains(voltage) {
        return Some(RejectionReason::CrossZone { kind, voltage });
    }

    None
}

/// Confidence from the local signal-to-noise ratio and the distance to the zone centre
fn confidence(
    candidate: &PeakCandidate,
    height: f64,
    trace: &ScanTrace,
    zones: &VoltageZones,
    config: &PeakConfig,
) -> f64 {
    let start = candidate.index.saturating_sub(config.snr_window);
    let end = (candidate.index + config.snr_window + 1).min(trace.len());
    let local_noise = noise_level(&trace.current()[start..end])
        .unwrap_or(0.0)
        .max(config.noise_floor);

    let snr = height.abs() / local_noise;
    let snr_term = snr / (snr + config.snr_half_point);

    let zone = zone_for(zones, candidate.kind);
    let centre_term = if zone.half_width() > 0.0 {
        (1.0 - (candidate.voltage - zone.center()).abs() / zone.half_width()).clamp(0.0, 1.0)
    } else {
        0.0
    };

    (snr_term * 0.5f64.mul_add(centre_term, 0.5)).clamp(0.0, 1.0)
}

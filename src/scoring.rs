use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::segment::Segment;
use crate::trace::{PeakRegion, SweepDirection, SweepHalf};
use crate::{Error, Result};

/// How candidate segments are grouped and ranked to pick a baseline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Rank groups of similarly sloped voltage windows by fit quality, coverage and position
    VoltageWindow(ScoringConfig),
}

impl Default for ScoringStrategy {
    fn default() -> Self {
        Self::VoltageWindow(ScoringConfig::default())
    }
}

impl ScoringStrategy {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::VoltageWindow(config) => config.validate(),
        }
    }

    /// Pick the group of `segments` which best describes the baseline of `half`
    ///
    /// Returns `None` if there are no segments, or if every group is implausibly long.
    pub fn select(
        &self,
        segments: &[Segment],
        half: &SweepHalf<'_>,
        regions: &[PeakRegion],
    ) -> Option<SegmentGroup> {
        match self {
            Self::VoltageWindow(config) => select_voltage_window(segments, half, regions, config),
        }
    }
}

/// Tuning constants for [`ScoringStrategy::VoltageWindow`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Accepted segment centres for the forward half, as fractions of the half
    pub forward_window: (f64, f64),
    /// Accepted segment centres for the reverse half, as fractions of the half
    pub reverse_window: (f64, f64),
    /// Segments whose slope magnitudes differ by less than this (µA/V) share a group
    pub slope_tolerance: f64,
    /// Groups covering more samples than this are discarded
    pub max_group_length: usize,
    /// Groups covering more samples than this are penalised
    pub soft_length_cap: usize,
    pub slope_scale: f64,
    pub r2_exponent: f64,
    pub stability_scale: f64,
    pub length_bonus_max: f64,
    /// Voltage span (V) at which the span bonus saturates
    pub span_reference: f64,
    pub span_bonus_max: f64,
    pub count_bonus_step: f64,
    pub count_bonus_max: f64,
    pub quality_step: f64,
    pub high_r2: f64,
    pub low_stability: f64,
    pub low_slope: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            forward_window: (0.0, 0.5),
            reverse_window: (0.0, 0.5),
            slope_tolerance: 2.0,
            max_group_length: 200,
            soft_length_cap: 25,
            slope_scale: 10.0,
            r2_exponent: 3.0,
            stability_scale: 0.3,
            length_bonus_max: 0.2,
            span_reference: 0.1,
            span_bonus_max: 0.2,
            count_bonus_step: 0.05,
            count_bonus_max: 0.2,
            quality_step: 0.05,
            high_r2: 0.98,
            low_stability: 0.15,
            low_slope: 1.0,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        for (name, (lo, hi)) in [
            ("forward", self.forward_window),
            ("reverse", self.reverse_window),
        ] {
            if !(0.0 <= lo && lo < hi && hi <= 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} scoring window [{lo}, {hi}] must be an ordered sub-interval of [0, 1]"
                )));
            }
        }
        if self.soft_length_cap == 0 || self.soft_length_cap > self.max_group_length {
            return Err(Error::InvalidConfig(
                "scoring soft length cap must be positive and below the hard cap".into(),
            ));
        }
        if !(self.slope_scale > 0.0 && self.stability_scale > 0.0 && self.span_reference > 0.0) {
            return Err(Error::InvalidConfig(
                "scoring scales must be positive".into(),
            ));
        }
        let bonus_caps = [
            self.length_bonus_max,
            self.span_bonus_max,
            self.count_bonus_max,
            3.0 * self.quality_step,
        ];
        if bonus_caps.iter().any(|cap| !(0.0..=0.2 + 1e-12).contains(cap)) {
            return Err(Error::InvalidConfig(
                "scoring bonuses must lie between 1x and 1.2x".into(),
            ));
        }
        Ok(())
    }
}

/// Segments with mutually similar slopes, and the score of the group as a baseline candidate
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentGroup {
    /// Ordered by first index
    pub segments: Vec<Segment>,
    pub score: f64,
}

/// Description of the segments selected as baseline for one half
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub start_idx: usize,
    pub end_idx: usize,
    /// Mean slope in µA/V
    pub slope: f64,
    /// Mean coefficient of determination
    pub r2: f64,
    pub voltage_start: f64,
    pub voltage_end: f64,
    pub segment_count: usize,
}

#[allow(clippy::cast_precision_loss)]
impl SegmentGroup {
    pub(crate) fn new(mut segments: Vec<Segment>) -> Self {
        segments.sort_by_key(|segment| (segment.start_idx, segment.end_idx));
        Self {
            segments,
            score: 0.0,
        }
    }

    pub fn start_idx(&self) -> usize {
        self.segments.iter().map(|s| s.start_idx).min().unwrap_or(0)
    }

    pub fn end_idx(&self) -> usize {
        self.segments.iter().map(|s| s.end_idx).max().unwrap_or(0)
    }

    /// Number of distinct samples covered by the (possibly overlapping) segments
    pub fn covered_length(&self) -> usize {
        let mut covered = 0;
        let mut reach: Option<usize> = None;
        for segment in &self.segments {
            let start = match reach {
                Some(reach) if segment.start_idx <= reach => reach + 1,
                _ => segment.start_idx,
            };
            if segment.end_idx >= start {
                covered += segment.end_idx - start + 1;
            }
            reach = Some(reach.map_or(segment.end_idx, |r| r.max(segment.end_idx)));
        }
        covered
    }

    fn mean_of(&self, metric: impl Fn(&Segment) -> f64) -> f64 {
        if self.segments.is_empty() {
            return 0.0;
        }
        self.segments.iter().map(metric).sum::<f64>() / self.segments.len() as f64
    }

    pub fn mean_slope(&self) -> f64 {
        self.mean_of(|s| s.slope)
    }

    pub fn mean_abs_slope(&self) -> f64 {
        self.mean_of(|s| s.slope.abs())
    }

    pub fn mean_r2(&self) -> f64 {
        self.mean_of(|s| s.r2)
    }

    pub fn mean_stability_ratio(&self) -> f64 {
        self.mean_of(|s| s.stability_ratio)
    }

    /// Voltage covered from the lowest to the highest segment potential
    pub fn voltage_span(&self) -> f64 {
        let (lo, hi) = self
            .segments
            .iter()
            .flat_map(|s| [s.voltage_start, s.voltage_end])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if hi >= lo {
            hi - lo
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> SegmentSummary {
        let first = self.segments.iter().min_by_key(|s| s.start_idx);
        let last = self.segments.iter().max_by_key(|s| s.end_idx);
        SegmentSummary {
            start_idx: self.start_idx(),
            end_idx: self.end_idx(),
            slope: self.mean_slope(),
            r2: self.mean_r2(),
            voltage_start: first.map_or(0.0, |s| s.voltage_start),
            voltage_end: last.map_or(0.0, |s| s.voltage_end),
            segment_count: self.segments.len(),
        }
    }
}

fn select_voltage_window(
    segments: &[Segment],
    half: &SweepHalf<'_>,
    regions: &[PeakRegion],
    config: &ScoringConfig,
) -> Option<SegmentGroup> {
    if segments.is_empty() {
        return None;
    }

    let candidates = positional_filter(segments, half, regions, config);
    let groups = group_by_slope(candidates, config.slope_tolerance);
    let num_groups = groups.len();

    let best = groups
        .into_iter()
        .filter(|group| group.covered_length() <= config.max_group_length)
        .map(|mut group| {
            group.score = score(&group, config);
            group
        })
        .max_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.start_idx().cmp(&a.start_idx()))
        });

    match &best {
        Some(group) => log::debug!(
            "{} half: best of {} groups has {} segments covering {} samples, score {:.4}",
            half.direction,
            num_groups,
            group.segments.len(),
            group.covered_length(),
            group.score
        ),
        None => log::debug!(
            "{} half: all {} groups exceed {} samples",
            half.direction,
            num_groups,
            config.max_group_length
        ),
    }

    best
}

/// Keep segments where a baseline is expected for the sweep direction
///
/// A forward baseline sits early in the sweep, a reverse baseline just after the turning point,
/// and in both cases before the first peak of the half. When nothing qualifies the first
/// (forward) or last (reverse) third of the half is used, and failing that every segment.
#[allow(clippy::cast_precision_loss)]
fn positional_filter(
    segments: &[Segment],
    half: &SweepHalf<'_>,
    regions: &[PeakRegion],
    config: &ScoringConfig,
) -> Vec<Segment> {
    let denominator = half.len().saturating_sub(1).max(1) as f64;
    let position = |segment: &Segment| {
        segment.center_idx().saturating_sub(half.offset) as f64 / denominator
    };
    let within = |segment: &Segment, (lo, hi): (f64, f64)| {
        let position = position(segment);
        lo <= position && position <= hi
    };

    let first_peak = regions
        .iter()
        .filter_map(|region| half.local((region.start_idx + region.end_idx) / 2))
        .min();
    let before_first_peak = |segment: &Segment| {
        first_peak.map_or(true, |peak| {
            segment.end_idx.saturating_sub(half.offset) < peak
        })
    };

    let window = match half.direction {
        SweepDirection::Forward => config.forward_window,
        SweepDirection::Reverse => config.reverse_window,
    };
    let preferred = segments
        .iter()
        .filter(|segment| within(segment, window) && before_first_peak(segment))
        .copied()
        .collect::<Vec<_>>();
    if !preferred.is_empty() {
        return preferred;
    }

    let third = match half.direction {
        SweepDirection::Forward => (0.0, 1.0 / 3.0),
        SweepDirection::Reverse => (2.0 / 3.0, 1.0),
    };
    let in_third = segments
        .iter()
        .filter(|segment| within(segment, third))
        .copied()
        .collect::<Vec<_>>();
    if !in_third.is_empty() {
        log::debug!(
            "{} half: no segment in the expected window, using the outer third",
            half.direction
        );
        return in_third;
    }

    log::debug!(
        "{} half: no positional match, considering all {} segments",
        half.direction,
        segments.len()
    );
    segments.to_vec()
}

/// Sort by slope magnitude and split wherever consecutive magnitudes differ by `tolerance` or more
fn group_by_slope(segments: Vec<Segment>, tolerance: f64) -> Vec<SegmentGroup> {
    let sorted = segments
        .into_iter()
        .sorted_by(|a, b| {
            a.slope
                .abs()
                .total_cmp(&b.slope.abs())
                .then_with(|| a.start_idx.cmp(&b.start_idx))
        })
        .collect::<Vec<_>>();

    let mut groups: Vec<Vec<Segment>> = vec![];
    for segment in sorted {
        match groups.last_mut() {
            Some(group)
                if group.last().map_or(false, |previous| {
                    (segment.slope.abs() - previous.slope.abs()) < tolerance
                }) =>
            {
                group.push(segment);
            }
            _ => groups.push(vec![segment]),
        }
    }

    groups.into_iter().map(SegmentGroup::new).collect()
}

/// Score a group as a baseline candidate
///
/// The score is the product of smooth terms for flatness, fit quality and stability, small
/// bounded bonuses for coverage and segment count, and a cubic penalty once the covered length
/// passes the soft cap. Without the penalty a long run of windows straddling the foot of a peak
/// could outscore a short genuine baseline.
#[allow(clippy::cast_precision_loss)]
fn score(group: &SegmentGroup, config: &ScoringConfig) -> f64 {
    let abs_slope = group.mean_abs_slope();
    let r2 = group.mean_r2();
    let stability = group.mean_stability_ratio();
    let covered = group.covered_length() as f64;
    let soft_cap = config.soft_length_cap as f64;
    let count = group.segments.len() as f64;

    let flatness = 1.0 / (1.0 + (abs_slope / config.slope_scale).powi(2));
    let r2_term = r2.max(0.0).powf(config.r2_exponent);
    let stability_term = (-stability / config.stability_scale).exp();

    let length_bonus = config.length_bonus_max.mul_add((covered / soft_cap).min(1.0), 1.0);
    let span_bonus = config
        .span_bonus_max
        .mul_add((group.voltage_span() / config.span_reference).min(1.0), 1.0);
    let count_bonus = 1.0
        + (config.count_bonus_step * (count - 1.0).max(0.0)).min(config.count_bonus_max);

    let clears = |passed: bool| if passed { config.quality_step } else { 0.0 };
    let quality_bonus = 1.0
        + clears(r2 >= config.high_r2)
        + clears(stability <= config.low_stability)
        + clears(abs_slope <= config.low_slope);

    let length_penalty = if covered > soft_cap {
        1.0 / (1.0 + ((covered - soft_cap) / soft_cap).powi(3))
    } else {
        1.0
    };

    flatness
        * r2_term
        * stability_term
        * length_bonus
        * span_bonus
        * count_bonus
        * quality_bonus
        * length_penalty
}

#[cfg(test)]
mod tests {
    use super::{group_by_slope, score, ScoringConfig, ScoringStrategy, SegmentGroup};
    use crate::segment::Segment;
    use crate::trace::{PeakRegion, ScanTrace};

    fn segment(start_idx: usize, end_idx: usize, slope: f64, r2: f64) -> Segment {
        #[allow(clippy::cast_precision_loss)]
        let (voltage_start, voltage_end) = (start_idx as f64 * 0.005, end_idx as f64 * 0.005);
        Segment {
            start_idx,
            end_idx,
            slope,
            intercept: 0.0,
            r2,
            stability_ratio: 0.05,
            voltage_start,
            voltage_end,
            mean_current: 1.0,
            length: end_idx - start_idx + 1,
        }
    }

    fn flat_trace(num_samples: usize) -> ScanTrace {
        #[allow(clippy::cast_precision_loss)]
        let voltage = (0..num_samples).map(|ii| ii as f64 * 0.005).collect();
        ScanTrace::new(voltage, vec![1.0; num_samples]).unwrap()
    }

    #[test]
    fn covered_length_counts_overlapping_samples_once() {
        let group = SegmentGroup::new(vec![
            segment(10, 20, 0.0, 1.0),
            segment(15, 25, 0.0, 1.0),
            segment(40, 44, 0.0, 1.0),
        ]);
        assert_eq!(group.covered_length(), 16 + 5);
        assert_eq!(group.start_idx(), 10);
        assert_eq!(group.end_idx(), 44);
    }

    #[test]
    fn segments_are_grouped_by_slope_magnitude() {
        let groups = group_by_slope(
            vec![
                segment(0, 10, 0.5, 1.0),
                segment(5, 15, -1.0, 1.0),
                segment(10, 20, 6.0, 1.0),
                segment(15, 25, 7.5, 1.0),
                segment(20, 30, 30.0, 1.0),
            ],
            2.0,
        );

        let sizes = groups.iter().map(|g| g.segments.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn flatter_groups_score_higher() {
        let config = ScoringConfig::default();
        let flat = SegmentGroup::new(vec![segment(0, 10, 0.1, 0.99)]);
        let sloped = SegmentGroup::new(vec![segment(0, 10, 20.0, 0.99)]);

        assert!(score(&flat, &config) > score(&sloped, &config));
    }

    #[test]
    fn long_groups_are_penalised() {
        let config = ScoringConfig::default();
        let local = SegmentGroup::new(vec![segment(0, 15, 0.1, 0.99), segment(5, 24, 0.1, 0.99)]);
        let long = SegmentGroup::new(vec![
            segment(0, 20, 0.1, 0.99),
            segment(15, 60, 0.1, 0.99),
            segment(50, 110, 0.1, 0.99),
        ]);

        assert!(score(&local, &config) > score(&long, &config));
    }

    #[test]
    fn bonuses_are_bounded() {
        let config = ScoringConfig::default();
        let group = SegmentGroup::new(
            (0..10)
                .map(|ii| segment(ii * 2, ii * 2 + 4, 0.0, 1.0))
                .collect(),
        );
        // flatness, fit and stability terms are at most one, each bonus at most 1.2
        let upper = 1.2f64.powi(4);
        assert!(score(&group, &config) <= upper);
        assert!(score(&group, &config) > 0.0);
    }

    #[test]
    fn groups_beyond_the_hard_cap_are_never_selected() {
        let trace = flat_trace(800);
        let strategy = ScoringStrategy::default();
        let long = vec![segment(0, 150, 0.0, 1.0), segment(140, 260, 0.0, 1.0)];

        assert!(strategy.select(&long, &trace.forward(), &[]).is_none());
    }

    #[test]
    fn forward_selection_prefers_segments_before_the_first_peak() {
        let trace = flat_trace(200);
        let strategy = ScoringStrategy::default();
        let segments = vec![
            segment(10, 20, 0.0, 1.0),
            segment(70, 80, 0.0, 1.0),
        ];
        let regions = [PeakRegion::new(40, 60)];

        let group = strategy
            .select(&segments, &trace.forward(), &regions)
            .unwrap();

        assert_eq!(group.segments, vec![segments[0]]);
    }

    #[test]
    fn selection_falls_back_to_all_segments() {
        let trace = flat_trace(200);
        let strategy = ScoringStrategy::default();
        // Centred at 75 % of the half, outside both the preferred window and the first third
        let segments = vec![segment(145, 155, 0.0, 1.0)];

        let group = strategy.select(&segments, &trace.forward(), &[]).unwrap();

        assert_eq!(group.segments.len(), 1);
    }

    #[test]
    fn nothing_is_selected_from_nothing() {
        let trace = flat_trace(50);
        assert!(ScoringStrategy::default()
            .select(&[], &trace.forward(), &[])
            .is_none());
    }

    #[test]
    fn summary_describes_the_group_extent() {
        let group = SegmentGroup::new(vec![segment(30, 40, 1.0, 0.9), segment(10, 20, 3.0, 0.7)]);
        let summary = group.summary();

        assert_eq!(summary.start_idx, 10);
        assert_eq!(summary.end_idx, 40);
        assert_eq!(summary.segment_count, 2);
        approx::assert_relative_eq!(summary.slope, 2.0);
        approx::assert_relative_eq!(summary.r2, 0.8, max_relative = 1e-12);
        approx::assert_relative_eq!(summary.voltage_start, 0.05);
        approx::assert_relative_eq!(summary.voltage_end, 0.2);
    }
}

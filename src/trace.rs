use std::fmt;

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which half of a cyclic sweep a sample belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepDirection {
    /// From the first sample up to and including the turning point
    Forward,
    /// From the sample after the turning point to the end of the scan
    Reverse,
}

impl fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// An inclusive range of global sample indices which the baseline search must not touch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakRegion {
    pub start_idx: usize,
    pub end_idx: usize,
}

impl PeakRegion {
    pub fn new(start_idx: usize, end_idx: usize) -> Self {
        Self {
            start_idx: start_idx.min(end_idx),
            end_idx: start_idx.max(end_idx),
        }
    }

    /// Whether the inclusive range `start..=end` shares any index with the region
    pub const fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start_idx <= end && start <= self.end_idx
    }

    pub const fn contains(&self, index: usize) -> bool {
        self.start_idx <= index && index <= self.end_idx
    }
}

/// One cyclic voltammetry scan
///
/// The scan holds the applied potential in volts and the measured current in µA. The sample at
/// the interior voltage extremum is the turning point: everything up to and including it forms
/// the forward half, everything after it the reverse half.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanTrace {
    voltage: Vec<f64>,
    current: Vec<f64>,
    turning_point: usize,
}

impl ScanTrace {
    /// Build a scan from paired voltage and current samples
    ///
    /// # Errors
    /// Returns an error if the two channels differ in length, or if any sample is `NaN` or
    /// infinite.
    pub fn new(voltage: Vec<f64>, current: Vec<f64>) -> Result<Self> {
        if voltage.len() != current.len() {
            return Err(Error::LengthMismatch {
                voltage: voltage.len(),
                current: current.len(),
            });
        }
        if let Some(index) = voltage.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFinite {
                channel: "voltage",
                index,
            });
        }
        if let Some(index) = current.iter().position(|i| !i.is_finite()) {
            return Err(Error::NonFinite {
                channel: "current",
                index,
            });
        }

        let turning_point = locate_turning_point(&voltage);

        Ok(Self {
            voltage,
            current,
            turning_point,
        })
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    pub const fn turning_point(&self) -> usize {
        self.turning_point
    }

    fn split(&self) -> usize {
        (self.turning_point + 1).min(self.len())
    }

    pub fn half(&self, direction: SweepDirection) -> SweepHalf<'_> {
        let split = self.split();
        let (offset, range) = match direction {
            SweepDirection::Forward => (0, 0..split),
            SweepDirection::Reverse => (split, split..self.len()),
        };
        SweepHalf {
            direction,
            offset,
            voltage: &self.voltage[range.clone()],
            current: &self.current[range],
        }
    }

    pub fn forward(&self) -> SweepHalf<'_> {
        self.half(SweepDirection::Forward)
    }

    pub fn reverse(&self) -> SweepHalf<'_> {
        self.half(SweepDirection::Reverse)
    }

    /// The half containing global sample `index`
    pub const fn direction_of(&self, index: usize) -> SweepDirection {
        if index <= self.turning_point {
            SweepDirection::Forward
        } else {
            SweepDirection::Reverse
        }
    }
}

/// Locate the turning point of a sweep
///
/// Of the voltage minimum and maximum, the one further from either end of the scan is taken. A
/// monotonic scan has no interior extremum, so the whole scan is treated as the forward half.
fn locate_turning_point(voltage: &[f64]) -> usize {
    let last = match voltage.len() {
        0 => return 0,
        n => n - 1,
    };

    let (min_idx, max_idx) = match voltage.iter().position_minmax() {
        MinMaxResult::NoElements => return 0,
        MinMaxResult::OneElement(idx) => (idx, idx),
        MinMaxResult::MinMax(min_idx, max_idx) => (min_idx, max_idx),
    };

    let depth = |idx: usize| idx.min(last - idx);
    match (depth(min_idx), depth(max_idx)) {
        (0, 0) => last,
        (min_depth, max_depth) if max_depth >= min_depth => max_idx,
        _ => min_idx,
    }
}

/// A borrowed view of one half of a [`ScanTrace`]
///
/// Local indices address `voltage` and `current` directly, `offset` converts them back to indices
/// into the full scan.
#[derive(Clone, Copy, Debug)]
pub struct SweepHalf<'a> {
    pub direction: SweepDirection,
    pub offset: usize,
    pub voltage: &'a [f64],
    pub current: &'a [f64],
}

impl SweepHalf<'_> {
    pub const fn len(&self) -> usize {
        self.voltage.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub const fn global(&self, local: usize) -> usize {
        self.offset + local
    }

    pub fn local(&self, global: usize) -> Option<usize> {
        global
            .checked_sub(self.offset)
            .filter(|&local| local < self.len())
    }

    /// The part of `region` which falls inside this half, in local indices
    pub fn local_region(&self, region: &PeakRegion) -> Option<(usize, usize)> {
        if self.is_empty() {
            return None;
        }
        let last = self.global(self.len() - 1);
        if !region.overlaps(self.offset, last) {
            return None;
        }
        let start = region.start_idx.max(self.offset) - self.offset;
        let end = region.end_idx.min(last) - self.offset;
        Some((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::{PeakRegion, ScanTrace, SweepDirection};
    use crate::Error;

    fn triangle(start: f64, vertex: f64, num_per_half: usize) -> Vec<f64> {
        let step = (vertex - start) / (num_per_half - 1) as f64;
        let out = (0..num_per_half).map(|ii| start + step * ii as f64);
        let back = (1..num_per_half).map(|ii| vertex - step * ii as f64);
        out.chain(back).collect()
    }

    #[test]
    fn turning_point_is_found_at_voltage_minimum_of_cathodic_first_scan() {
        let voltage = triangle(0.6, -0.6, 11);
        let current = vec![0.0; voltage.len()];
        let trace = ScanTrace::new(voltage, current).unwrap();

        assert_eq!(trace.turning_point(), 10);
        assert_eq!(trace.forward().len(), 11);
        assert_eq!(trace.reverse().len(), 10);
        assert_eq!(trace.reverse().offset, 11);
    }

    #[test]
    fn turning_point_is_found_at_voltage_maximum_of_anodic_first_scan() {
        let voltage = triangle(-0.2, 0.5, 8);
        let current = vec![1.0; voltage.len()];
        let trace = ScanTrace::new(voltage, current).unwrap();

        assert_eq!(trace.turning_point(), 7);
        assert_eq!(trace.direction_of(7), SweepDirection::Forward);
        assert_eq!(trace.direction_of(8), SweepDirection::Reverse);
    }

    #[test]
    fn monotonic_scans_are_entirely_forward() {
        for voltage in [
            vec![0.0, 0.1, 0.2, 0.3],
            vec![0.3, 0.2, 0.1, 0.0],
        ] {
            let trace = ScanTrace::new(voltage, vec![0.0; 4]).unwrap();
            assert_eq!(trace.forward().len(), 4);
            assert!(trace.reverse().is_empty());
        }
    }

    #[test]
    fn empty_scans_have_empty_halves() {
        let trace = ScanTrace::new(vec![], vec![]).unwrap();
        assert!(trace.forward().is_empty());
        assert!(trace.reverse().is_empty());
    }

    #[test]
    fn mismatched_channels_are_rejected() {
        let result = ScanTrace::new(vec![0.0, 0.1], vec![1.0]);
        assert!(matches!(
            result,
            Err(Error::LengthMismatch {
                voltage: 2,
                current: 1
            })
        ));
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let result = ScanTrace::new(vec![0.0, 0.1, 0.2], vec![1.0, f64::NAN, 1.0]);
        assert!(matches!(
            result,
            Err(Error::NonFinite {
                channel: "current",
                index: 1
            })
        ));
    }

    #[test]
    fn regions_are_mapped_into_local_indices() {
        let voltage = triangle(0.0, 1.0, 6);
        let trace = ScanTrace::new(voltage, vec![0.0; 11]).unwrap();
        let reverse = trace.reverse();

        assert_eq!(reverse.local_region(&PeakRegion::new(4, 8)), Some((0, 2)));
        assert_eq!(reverse.local_region(&PeakRegion::new(0, 3)), None);
        assert_eq!(trace.forward().local_region(&PeakRegion::new(4, 8)), Some((4, 5)));
    }
}

use serde::Serialize;

use crate::baseline::{self, BaselineOutcome, BaselineStatus};
use crate::config::DetectorConfig;
use crate::peaks::{self, PeakKind};
use crate::scoring::SegmentSummary;
use crate::trace::{PeakRegion, ScanTrace, SweepHalf};
use crate::validation::{self, BaselinePair, PeakOutcome, ValidatedPeak};
use crate::{Error, Result};

/// Runs the pre-scan, baseline and peak passes over a scan
///
/// An analyzer holds nothing but its configuration, so one can be shared between threads and
/// reused for any number of scans.
///
/// # Examples
///
/// ```
/// use voltammetry::{Analyzer, DetectorConfig, ScanTrace};
///
/// let voltage = (0..40).map(|ii| f64::from(ii) * 0.01).collect::<Vec<_>>();
/// let current = vec![1.5; 40];
/// let trace = ScanTrace::new(voltage, current).unwrap();
///
/// let analysis = Analyzer::new(DetectorConfig::default()).unwrap().analyze(&trace);
///
/// assert_eq!(analysis.forward_baseline.len(), 40);
/// assert!(analysis.peaks.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Analyzer {
    config: DetectorConfig,
}

impl Analyzer {
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the configuration is inconsistent.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Analyse `trace`, locating peaks with the pre-scan
    ///
    /// Never fails: if a half has no usable baseline segments it gets a constant fallback
    /// baseline, and a scan too short to analyse gets fallback baselines and no peaks.
    pub fn analyze(&self, trace: &ScanTrace) -> Analysis {
        self.run(trace, None)
    }

    /// Analyse `trace`, keeping the baseline search clear of `regions` instead of pre-scanning
    pub fn analyze_with_regions(&self, trace: &ScanTrace, regions: &[PeakRegion]) -> Analysis {
        self.run(trace, Some(regions))
    }

    fn run(&self, trace: &ScanTrace, regions: Option<&[PeakRegion]>) -> Analysis {
        match self.try_run(trace, regions) {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!("analysis failed, substituting fallback output: {e}");
                Analysis::fallback(trace, &self.config, &e)
            }
        }
    }

    fn try_run(&self, trace: &ScanTrace, regions: Option<&[PeakRegion]>) -> Result<Analysis> {
        if trace.len() < self.config.min_samples {
            return Err(Error::InsufficientData {
                required: self.config.min_samples,
                actual: trace.len(),
            });
        }

        let regions = match regions {
            Some(regions) => regions.to_vec(),
            None if self.config.peaks.prescan_enabled => peaks::prescan(trace, &self.config.peaks),
            None => vec![],
        };

        let forward = self.baseline(&trace.forward(), &regions);
        let reverse = self.baseline(&trace.reverse(), &regions);

        let candidates = peaks::detect(
            trace,
            self.config.peaks.min_prominence,
            self.config.peaks.min_width,
        );
        let validated = validation::validate(
            &candidates,
            trace,
            &BaselinePair {
                forward: forward.baseline(),
                reverse: reverse.baseline(),
            },
            &self.config.zones,
            &self.config.peaks,
        );

        let analysis = Analysis::new(forward, reverse, &validated);
        log::info!(
            "analysed {} samples: {} peaks accepted, {} rejected",
            trace.len(),
            analysis.peaks.len(),
            analysis.rejected_peaks.len()
        );
        Ok(analysis)
    }

    fn baseline(&self, half: &SweepHalf<'_>, regions: &[PeakRegion]) -> BaselineOutcome {
        match baseline::detect(half, regions, &self.config) {
            Ok(detected) => BaselineOutcome::Detected(detected),
            Err(e) => {
                log::warn!("{} half falls back to a constant baseline: {e}", half.direction);
                BaselineOutcome::fallback(half, &self.config.baseline, &e)
            }
        }
    }
}

/// An accepted peak
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakReport {
    pub voltage: f64,
    pub current: f64,
    pub kind: PeakKind,
    pub height: f64,
    pub confidence: f64,
}

/// A candidate turned down by the validator, with the rule it failed
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RejectedPeakReport {
    pub voltage: f64,
    pub current: f64,
    pub kind: PeakKind,
    pub reason: String,
}

/// The result of analysing one scan
///
/// The baselines always have the lengths of the forward and reverse halves of the scan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analysis {
    pub forward_baseline: Vec<f64>,
    pub reverse_baseline: Vec<f64>,
    pub forward_segment: Option<SegmentSummary>,
    pub reverse_segment: Option<SegmentSummary>,
    pub peaks: Vec<PeakReport>,
    pub rejected_peaks: Vec<RejectedPeakReport>,
    pub forward_status: BaselineStatus,
    pub reverse_status: BaselineStatus,
}

impl Analysis {
    fn new(forward: BaselineOutcome, reverse: BaselineOutcome, validated: &[ValidatedPeak]) -> Self {
        let mut peaks = vec![];
        let mut rejected_peaks = vec![];
        for peak in validated {
            let candidate = &peak.candidate;
            match &peak.outcome {
                PeakOutcome::Accepted => peaks.push(PeakReport {
                    voltage: candidate.voltage,
                    current: candidate.current,
                    kind: candidate.kind,
                    height: peak.height,
                    confidence: peak.confidence,
                }),
                PeakOutcome::Rejected(reason) => rejected_peaks.push(RejectedPeakReport {
                    voltage: candidate.voltage,
                    current: candidate.current,
                    kind: candidate.kind,
                    reason: reason.to_string(),
                }),
            }
        }

        Self {
            forward_segment: forward.summary(),
            reverse_segment: reverse.summary(),
            forward_status: forward.status(),
            reverse_status: reverse.status(),
            forward_baseline: forward.into_baseline(),
            reverse_baseline: reverse.into_baseline(),
            peaks,
            rejected_peaks,
        }
    }

    /// Fallback baselines for both halves and no peaks, recording `reason`
    pub fn fallback(trace: &ScanTrace, config: &DetectorConfig, reason: &Error) -> Self {
        Self::new(
            BaselineOutcome::fallback(&trace.forward(), &config.baseline, reason),
            BaselineOutcome::fallback(&trace.reverse(), &config.baseline, reason),
            &[],
        )
    }

    /// Whether either half had to fall back to a constant baseline
    pub fn is_fallback(&self) -> bool {
        matches!(self.forward_status, BaselineStatus::Fallback(_))
            || matches!(self.reverse_status, BaselineStatus::Fallback(_))
    }

    /// Accepted peaks of one kind
    pub fn peaks_of(&self, kind: PeakKind) -> impl Iterator<Item = &PeakReport> + '_ {
        self.peaks.iter().filter(move |peak| peak.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::{Analysis, Analyzer};
    use crate::baseline::BaselineStatus;
    use crate::config::DetectorConfig;
    use crate::trace::ScanTrace;
    use crate::Error;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn analyzers_can_be_shared_between_threads() {
        assert_send_sync::<Analyzer>();
        assert_send_sync::<DetectorConfig>();
    }

    #[test]
    fn invalid_configurations_are_refused() {
        let mut config = DetectorConfig::default();
        config.baseline.fallback_fraction = 0.0;
        assert!(matches!(Analyzer::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn fallback_analyses_cover_both_halves() {
        let voltage = vec![0.0, 0.1, 0.2, 0.3, 0.2, 0.1];
        let current = vec![1.0, 1.0, 1.0, 3.0, 3.0, 3.0];
        let trace = ScanTrace::new(voltage, current).unwrap();
        let error = Error::InsufficientData {
            required: 10,
            actual: 6,
        };

        let analysis = Analysis::fallback(&trace, &DetectorConfig::default(), &error);

        assert_eq!(analysis.forward_baseline, vec![1.0; 4]);
        assert_eq!(analysis.reverse_baseline, vec![3.0; 2]);
        assert!(analysis.is_fallback());
        assert!(analysis.peaks.is_empty());
        assert!(analysis.forward_segment.is_none());
        assert_eq!(
            analysis.reverse_status,
            BaselineStatus::Fallback(error.to_string())
        );
    }
}

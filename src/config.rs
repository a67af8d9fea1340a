use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scoring::ScoringStrategy;
use crate::{Error, Result};

/// Settings for the whole detection pipeline
///
/// A single value is passed into every analysis. It is never mutated by the pipeline, so one
/// configuration can be shared between any number of concurrent analyses. Every field has a
/// default tuned against ferro/ferricyanide scans, and a TOML file only needs to name the fields
/// it overrides:
///
/// ```toml
/// min_samples = 20
///
/// [zones.oxidation]
/// min = 0.15
/// max = 0.35
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Scans shorter than this are not analysed
    pub min_samples: usize,
    pub scanner: ScannerConfig,
    pub scoring: ScoringStrategy,
    pub baseline: BaselineConfig,
    pub peaks: PeakConfig,
    pub zones: VoltageZones,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            scanner: ScannerConfig::default(),
            scoring: ScoringStrategy::default(),
            baseline: BaselineConfig::default(),
            peaks: PeakConfig::default(),
            zones: VoltageZones::default(),
        }
    }
}

impl DetectorConfig {
    /// Read a configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or describes an invalid
    /// configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse a configuration from TOML
    ///
    /// # Errors
    /// Returns an error if `contents` is not valid TOML or describes an invalid configuration.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the analyte voltage zones
    #[must_use]
    pub fn with_zones(mut self, zones: VoltageZones) -> Self {
        self.zones = zones;
        self
    }

    /// Check the configuration is internally consistent
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first inconsistent setting.
    pub fn validate(&self) -> Result<()> {
        self.scanner.validate()?;
        self.scoring.validate()?;
        self.baseline.validate()?;
        self.peaks.validate()?;
        self.zones.oxidation.validate("oxidation")?;
        self.zones.reduction.validate("reduction")?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig(message.into())
}

/// Settings for the sliding voltage window search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// The window span is the voltage range of the half divided by this
    pub target_windows: usize,
    /// Lower clamp on the window span in volts
    pub min_window_span: f64,
    /// Upper clamp on the window span in volts
    pub max_window_span: f64,
    /// Window step as a fraction of the window span
    pub step_fraction: f64,
    /// Slack on the window bounds as a fraction of the window span
    pub tolerance_fraction: f64,
    pub min_points: usize,
    pub max_points: usize,
    /// Fraction of the half dropped at each end before windowing
    pub edge_exclusion: f64,
    /// Hard limit on the number of window positions examined in one half
    pub max_windows: usize,
    pub min_r2: f64,
    /// A window below `min_r2` is still accepted when its residual RMS is within this many
    /// noise standard deviations of the half
    pub noise_tolerance: f64,
    /// Largest accepted slope magnitude in µA/V
    pub max_abs_slope: f64,
    pub max_stability_ratio: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target_windows: 15,
            min_window_span: 0.02,
            max_window_span: 0.15,
            step_fraction: 0.3,
            tolerance_fraction: 0.01,
            min_points: 5,
            max_points: 25,
            edge_exclusion: 0.05,
            max_windows: 400,
            min_r2: 0.5,
            noise_tolerance: 2.0,
            max_abs_slope: 50.0,
            max_stability_ratio: 0.5,
        }
    }
}

impl ScannerConfig {
    fn validate(&self) -> Result<()> {
        if self.target_windows == 0 || self.max_windows == 0 {
            return Err(invalid("scanner window counts must be positive"));
        }
        if !(self.min_window_span > 0.0 && self.min_window_span <= self.max_window_span) {
            return Err(invalid(format!(
                "scanner window span bounds [{}, {}] are not ordered and positive",
                self.min_window_span, self.max_window_span
            )));
        }
        if !(self.step_fraction > 0.0 && self.step_fraction <= 1.0) {
            return Err(invalid("scanner step fraction must lie in (0, 1]"));
        }
        if !(0.0..0.5).contains(&self.edge_exclusion) {
            return Err(invalid("scanner edge exclusion must lie in [0, 0.5)"));
        }
        if self.noise_tolerance < 0.0 {
            return Err(invalid("scanner noise tolerance must not be negative"));
        }
        if self.tolerance_fraction < 0.0 {
            return Err(invalid("scanner tolerance fraction must not be negative"));
        }
        if self.min_points < 2 || self.min_points > self.max_points {
            return Err(invalid(format!(
                "scanner point bounds [{}, {}] must be ordered and at least two",
                self.min_points, self.max_points
            )));
        }
        Ok(())
    }
}

/// Settings for turning the selected segments into a baseline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Below this spread of representative currents (µA) the baseline is constant
    pub flat_spread: f64,
    /// Fraction of the half averaged by the emergency fallback baseline
    pub fallback_fraction: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            flat_spread: 0.1,
            fallback_fraction: 0.2,
        }
    }
}

impl BaselineConfig {
    fn validate(&self) -> Result<()> {
        if !(self.fallback_fraction > 0.0 && self.fallback_fraction <= 1.0) {
            return Err(invalid("baseline fallback fraction must lie in (0, 1]"));
        }
        if self.flat_spread < 0.0 {
            return Err(invalid("baseline flat spread must not be negative"));
        }
        Ok(())
    }
}

/// Settings for peak candidate search and validation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum prominence of a reported candidate, relative to the largest absolute current
    pub min_prominence: f64,
    /// Minimum width at half prominence, in samples
    pub min_width: f64,
    /// Run the pre-scan which protects the baseline search from peaks
    pub prescan_enabled: bool,
    /// Minimum relative prominence of a pre-scan candidate
    pub prescan_prominence: f64,
    /// A pre-scan region extends this many peak widths either side of the peak
    pub region_width_factor: f64,
    /// Extra samples added either side of a pre-scan region
    pub region_margin: usize,
    /// Pre-scan candidates wider than this fraction of their half are background curvature
    pub prescan_max_width: f64,
    /// A pre-scan region reaches at most this fraction of its half either side of the peak
    pub region_max_reach: f64,
    /// Smallest accepted peak height above baseline, in µA
    pub min_height: f64,
    /// Peaks must also exceed this multiple of the estimated noise
    pub noise_multiplier: f64,
    /// Lower bound on the noise estimate used for signal-to-noise ratios, in µA
    pub noise_floor: f64,
    /// Samples either side of a peak used to estimate its local noise
    pub snr_window: usize,
    /// Signal-to-noise ratio at which the confidence signal term reaches one half
    pub snr_half_point: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            min_prominence: 0.1,
            min_width: 3.0,
            prescan_enabled: true,
            prescan_prominence: 0.03,
            region_width_factor: 1.5,
            region_margin: 5,
            prescan_max_width: 0.25,
            region_max_reach: 0.2,
            min_height: 0.5,
            noise_multiplier: 3.0,
            noise_floor: 0.05,
            snr_window: 30,
            snr_half_point: 3.0,
        }
    }
}

impl PeakConfig {
    fn validate(&self) -> Result<()> {
        if self.min_prominence < 0.0 || self.prescan_prominence < 0.0 {
            return Err(invalid("peak prominences must not be negative"));
        }
        if self.min_width < 0.0 || self.region_width_factor < 0.0 {
            return Err(invalid("peak widths must not be negative"));
        }
        if !(self.prescan_max_width > 0.0 && self.region_max_reach > 0.0) {
            return Err(invalid("pre-scan width and reach fractions must be positive"));
        }
        if !(self.noise_floor > 0.0) {
            return Err(invalid("peak noise floor must be positive"));
        }
        if self.snr_window == 0 {
            return Err(invalid("peak signal-to-noise window must not be empty"));
        }
        if !(self.snr_half_point > 0.0) {
            return Err(invalid("peak signal-to-noise half point must be positive"));
        }
        Ok(())
    }
}

/// A closed voltage interval in volts
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoltageZone {
    pub min: f64,
    pub max: f64,
}

impl VoltageZone {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, voltage: f64) -> bool {
        (self.min..=self.max).contains(&voltage)
    }

    pub fn center(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn half_width(&self) -> f64 {
        (self.max - self.min) / 2.0
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(invalid(format!(
                "{name} zone [{}, {}] must be finite and ordered",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Where the oxidation and reduction peaks of the analyte are expected
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageZones {
    pub oxidation: VoltageZone,
    pub reduction: VoltageZone,
}

impl Default for VoltageZones {
    fn default() -> Self {
        Self {
            oxidation: VoltageZone::new(0.1, 0.3),
            reduction: VoltageZone::new(-0.1, 0.1),
        }
    }
}

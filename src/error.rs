use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("voltage and current must have equal length: {voltage} voltage samples, {current} current samples")]
    LengthMismatch { voltage: usize, current: usize },
    #[error("non-finite {channel} sample at index {index}")]
    NonFinite { channel: &'static str, index: usize },
    #[error("insufficient data: {actual} samples, at least {required} required")]
    InsufficientData { required: usize, actual: usize },
    #[error("no baseline segment found in the {0} half")]
    NoSegmentFound(crate::trace::SweepDirection),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

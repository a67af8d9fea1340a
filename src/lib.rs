#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod baseline;
pub mod config;
mod error;
pub mod math;
pub mod peaks;
pub mod pipeline;
pub mod scoring;
pub mod segment;
pub mod trace;
pub mod validation;

pub use config::DetectorConfig;
pub use error::Error;
pub use pipeline::{Analysis, Analyzer};
pub use trace::{PeakRegion, ScanTrace, SweepDirection};

pub type Result<T> = ::std::result::Result<T, Error>;

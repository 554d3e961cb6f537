//! hardpoint-bench - Synchronized acquisition for the hardpoint test stand
//!
//! Samples two displacement interferometers and the stand PLC on a common
//! clock, merges each tick into one record, and persists the stream as CSV.
//!
//! - [`sampling`] - session loop, termination policies, stepped phases
//! - [`sampler`] - per-tick fusion of channel readings and PLC symbols
//! - [`profile`] - column schemas of the stand's test variants
//! - [`procedures`] - load, stiffness, repeatability and raw readouts
//! - [`record_writer`] - CSV output and read-back
//! - [`fit_plots`] - linear-fit plot reports
//! - [`config`] - JSON stand configuration
//! - [`stand`] - opening device connections

pub mod config;
pub mod error;
pub mod fit_plots;
pub mod procedures;
pub mod profile;
pub mod record_writer;
pub mod sampler;
pub mod sampling;
pub mod stand;

pub use config::StandConfig;
pub use error::SamplingError;
pub use procedures::{Bench, RunSummary};
pub use profile::{ProfileKind, StandProfile};
pub use record_writer::{RecordTable, RecordWriter};
pub use sampler::SensorFusionSampler;
pub use sampling::{
    Clock, ManualClock, MonotonicClock, Phase, SampleRecord, SamplingSession, TerminationPolicy,
};
pub use stand::DeviceFactory;

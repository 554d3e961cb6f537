//! Error taxonomy for stand sessions

use meter_math::{DimensionMismatch, FitError};
use thiserror::Error;

/// Errors raised while connecting, sampling, persisting or plotting.
///
/// None of these are retried. Connection and source failures abort the
/// session; records already produced stay with the session and any sink.
#[derive(Error, Debug)]
pub enum SamplingError {
    /// A device could not be reached before sampling started
    #[error("failed to connect to {device}: {reason}")]
    ConnectionFailure { device: String, reason: String },

    /// A read or write failed mid-session
    #[error("{device} unavailable: {reason}")]
    SourceUnavailable { device: String, reason: String },

    /// Channel count does not match the calibration matrix
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),

    /// Record or table does not carry a declared field
    #[error("schema mismatch on field '{field}': {context}")]
    SchemaMismatch { field: String, context: String },

    /// Initial actuator setpoint outside the configured limits
    #[error("setpoint {value} outside actuator limits {min}..={max}")]
    SetpointOutOfRange { value: i64, min: i64, max: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid stand configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fit failed for {x} vs {y}: {source}")]
    Fit {
        x: String,
        y: String,
        #[source]
        source: FitError,
    },

    /// Plot backend failure
    #[error("plot error: {0}")]
    Plot(String),
}

impl SamplingError {
    pub fn connection(device: impl Into<String>, reason: impl ToString) -> Self {
        SamplingError::ConnectionFailure {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        SamplingError::SourceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        SamplingError::SchemaMismatch {
            field: field.into(),
            context: context.into(),
        }
    }
}

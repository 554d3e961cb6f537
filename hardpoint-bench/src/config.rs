//! Stand configuration
//!
//! Device addresses, calibration and test parameters. Serialized as JSON;
//! [`StandConfig::default`] describes the hardpoint stand as built.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hardware::{DEFAULT_ADS_PORT, DEFAULT_IDS_PORT};
use meter_math::{CalibrationMatrix, PoseTransform, PICOMETERS_PER_MICROMETER};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::profile::LOAD_BUSY_FLAG;
use crate::sampling::Phase;
use crate::SamplingError;

/// One interferometer on the stand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterferometerConfig {
    /// Short name used in column headers, e.g. `206`
    pub name: String,
    /// IP address, optionally with port
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// AMS Net ID of the PLC
    pub net_id: String,
    pub port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            net_id: "10.10.160.129.1.1".to_string(),
            port: DEFAULT_ADS_PORT,
        }
    }
}

/// Position-repeatability test parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatabilityConfig {
    /// Setpoint step (encoder counts)
    pub step_counts: i64,
    /// Hold time of each phase (seconds)
    pub phase_duration_secs: f64,
    /// Step multiples applied at each phase start
    pub step_pattern: Vec<i64>,
    /// Lowest accepted initial setpoint (counts)
    pub setpoint_min: i64,
    /// Highest accepted initial setpoint (counts)
    pub setpoint_max: i64,
    /// Setpoint travel per count (µm)
    pub setpoint_scale_um_per_count: f64,
}

impl Default for RepeatabilityConfig {
    fn default() -> Self {
        Self {
            step_counts: 2000,
            phase_duration_secs: 10.0,
            step_pattern: vec![0, 1, -1, -1, 1],
            setpoint_min: 22_400_000,
            setpoint_max: 31_400_000,
            setpoint_scale_um_per_count: 5e-3,
        }
    }
}

impl RepeatabilityConfig {
    pub fn phase_duration(&self) -> Result<Duration, SamplingError> {
        Duration::try_from_secs_f64(self.phase_duration_secs).map_err(|e| {
            SamplingError::Config(format!("invalid phase duration {}: {e}", self.phase_duration_secs))
        })
    }

    /// Phases of the stepped session.
    ///
    /// # Errors
    /// [`SamplingError::Config`] if the phase duration, or the total of all
    /// phases, cannot be represented.
    pub fn phases(&self) -> Result<Vec<Phase>, SamplingError> {
        let duration = self.phase_duration()?;
        let count = u32::try_from(self.step_pattern.len()).ok();
        if count.and_then(|n| duration.checked_mul(n)).is_none() {
            return Err(SamplingError::Config(format!(
                "{} phases of {} s overflow the session clock",
                self.step_pattern.len(),
                self.phase_duration_secs
            )));
        }
        Ok(Phase::stepped(&self.step_pattern, self.step_counts, duration))
    }

    pub fn check_setpoint(&self, setpoint: i64) -> Result<(), SamplingError> {
        if (self.setpoint_min..=self.setpoint_max).contains(&setpoint) {
            Ok(())
        } else {
            Err(SamplingError::SetpointOutOfRange {
                value: setpoint,
                min: self.setpoint_min,
                max: self.setpoint_max,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandConfig {
    pub interferometers: Vec<InterferometerConfig>,
    pub controller: ControllerConfig,
    /// Channel-to-pose calibration, one row per channel
    pub calibration: CalibrationMatrix,
    /// Raw interferometer units per reported unit
    pub raw_unit_divisor: f64,
    /// Minimum tick spacing in milliseconds, 0 for as fast as possible
    pub poll_interval_ms: u64,
    pub output_dir: PathBuf,
    /// Controller flag ending load tests
    pub flag_symbol: String,
    pub position_repeatability: RepeatabilityConfig,
}

impl Default for StandConfig {
    fn default() -> Self {
        Self {
            interferometers: vec![
                InterferometerConfig {
                    name: "206".to_string(),
                    address: format!("192.168.88.206:{DEFAULT_IDS_PORT}"),
                },
                InterferometerConfig {
                    name: "207".to_string(),
                    address: format!("192.168.88.207:{DEFAULT_IDS_PORT}"),
                },
            ],
            controller: ControllerConfig::default(),
            calibration: CalibrationMatrix::hardpoint(),
            raw_unit_divisor: PICOMETERS_PER_MICROMETER,
            poll_interval_ms: 0,
            output_dir: PathBuf::from("AttoCube_Results"),
            flag_symbol: LOAD_BUSY_FLAG.to_string(),
            position_repeatability: RepeatabilityConfig::default(),
        }
    }
}

impl StandConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SamplingError> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| SamplingError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;

        info!("Loaded stand configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SamplingError> {
        let file = File::create(path.as_ref())?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).map_err(|e| SamplingError::Config(e.to_string()))?;

        info!("Saved stand configuration to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SamplingError> {
        let invalid = |msg: String| Err(SamplingError::Config(msg));

        if self.interferometers.is_empty() {
            return invalid("no interferometers configured".into());
        }
        if !(self.raw_unit_divisor.is_finite() && self.raw_unit_divisor > 0.0) {
            return invalid(format!("raw unit divisor must be positive, got {}", self.raw_unit_divisor));
        }
        let repeat = &self.position_repeatability;
        if repeat.step_pattern.is_empty() {
            return invalid("empty position-repeatability step pattern".into());
        }
        repeat.phases()?;
        if repeat.setpoint_min > repeat.setpoint_max {
            return invalid(format!(
                "setpoint limits reversed: {} > {}",
                repeat.setpoint_min, repeat.setpoint_max
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pose_transform(&self) -> PoseTransform {
        PoseTransform::new(self.calibration.clone(), self.raw_unit_divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_config() {
        let config = StandConfig::default();

        assert_eq!(config.interferometers.len(), 2);
        assert_eq!(config.interferometers[0].address, "192.168.88.206:9090");
        assert_eq!(config.controller.port, 851);
        assert_abs_diff_eq!(config.raw_unit_divisor, 1e6, epsilon = f64::EPSILON);
        assert_eq!(config.poll_interval(), Duration::ZERO);
        assert_eq!(config.calibration.input_channels(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stand.json");
        let mut config = StandConfig::default();
        config.poll_interval_ms = 5;
        config.position_repeatability.step_counts = 500;

        config.save(&path).unwrap();
        let loaded = StandConfig::load(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stand.json");
        std::fs::write(&path, r#"{ "poll_interval_ms": 20 }"#).unwrap();

        let config = StandConfig::load(&path).unwrap();

        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.position_repeatability.step_counts, 2000);
    }

    #[test]
    fn test_invalid_divisor_rejected() {
        let config = StandConfig {
            raw_unit_divisor: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SamplingError::Config(_))));
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stand.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(StandConfig::load(&path), Err(SamplingError::Config(_))));
    }

    #[test]
    fn test_unrepresentable_phase_duration_rejected() {
        for seconds in [1e30, f64::INFINITY, -1.0] {
            let mut config = StandConfig::default();
            config.position_repeatability.phase_duration_secs = seconds;

            assert!(matches!(config.validate(), Err(SamplingError::Config(_))), "{seconds}");
            assert!(config.position_repeatability.phases().is_err());
        }
    }

    #[test]
    fn test_phase_total_overflow_rejected() {
        let mut config = StandConfig::default();
        // Each phase fits, five of them do not
        config.position_repeatability.phase_duration_secs = u64::MAX as f64 / 2.0;

        assert!(matches!(config.validate(), Err(SamplingError::Config(_))));
    }

    #[test]
    fn test_setpoint_limits() {
        let repeat = RepeatabilityConfig::default();

        assert!(repeat.check_setpoint(26_000_000).is_ok());
        assert!(repeat.check_setpoint(31_400_000).is_ok());
        assert!(matches!(
            repeat.check_setpoint(31_400_001),
            Err(SamplingError::SetpointOutOfRange { value: 31_400_001, .. })
        ));
        assert!(repeat.check_setpoint(22_399_999).is_err());
    }

    #[test]
    fn test_phases() {
        let phases = RepeatabilityConfig::default().phases().unwrap();
        assert_eq!(phases.len(), 5);
        assert_eq!(phases[3].setpoint_delta, -2000);
        assert_eq!(phases[0].duration, Duration::from_secs(10));
    }
}

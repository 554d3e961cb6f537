//! Sensor fusion sampler
//!
//! Owns the stand connections for the length of a session and turns each
//! tick into one record. Per tick, in order:
//!
//! 1. one batch read of the profile's controller symbols
//! 2. one displacement read per channel
//! 3. channel echo writes to the controller, if the profile has any
//! 4. the pose transform, if the profile has pose columns
//! 5. record assembly from the profile's column list
//!
//! Any failed device call aborts the tick with
//! [`SamplingError::SourceUnavailable`] naming the device.

use std::collections::HashMap;
use std::time::Duration;

use hardware::ids::MODE_POLL_INTERVAL;
use hardware::{
    wait_until_in_mode, Connected, ControllerInterface, IdsMode, InterferometerInterface, PlcType,
    SymbolBatch, SymbolValue,
};
use meter_math::{DimensionMismatch, PoseTransform};
use tracing::{debug, info, trace};

use crate::profile::{Baselines, StandProfile, TickReadings};
use crate::sampling::{SampleRecord, TickSource};
use crate::SamplingError;

/// Merges interferometer channels and controller symbols into records.
pub struct SensorFusionSampler<I, C>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    interferometers: Vec<Connected<I>>,
    controller: Option<Connected<C>>,
    profile: StandProfile,
    transform: Option<PoseTransform>,
    divisor: f64,
    baselines: Baselines,
    last_symbols: Option<SymbolBatch>,
}

impl<I, C> SensorFusionSampler<I, C>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    /// Take ownership of the connections for `profile`.
    ///
    /// # Errors
    /// [`SamplingError::Config`] if the profile references a missing device
    /// or needs a controller that was not supplied;
    /// [`SamplingError::DimensionMismatch`] if pose columns are requested and
    /// the calibration does not take one reading per channel.
    pub fn new(
        interferometers: Vec<Connected<I>>,
        controller: Option<Connected<C>>,
        profile: StandProfile,
        transform: PoseTransform,
    ) -> Result<Self, SamplingError> {
        if let Some(channel) = profile
            .channels
            .iter()
            .find(|c| c.device >= interferometers.len())
        {
            return Err(SamplingError::Config(format!(
                "{} profile reads interferometer {} but only {} connected",
                profile.kind,
                channel.device,
                interferometers.len()
            )));
        }
        if profile.needs_controller() && controller.is_none() {
            return Err(SamplingError::Config(format!(
                "{} profile needs a controller connection",
                profile.kind
            )));
        }
        if profile.echo_symbols.len() > profile.channels.len() {
            return Err(SamplingError::Config(format!(
                "{} echo symbols for {} channels",
                profile.echo_symbols.len(),
                profile.channels.len()
            )));
        }

        let needs_pose = profile.needs_pose();
        if needs_pose && transform.calibration.input_channels() != profile.channels.len() {
            return Err(DimensionMismatch {
                expected: transform.calibration.input_channels(),
                actual: profile.channels.len(),
            }
            .into());
        }

        Ok(Self {
            interferometers,
            controller,
            divisor: transform.raw_unit_divisor,
            transform: needs_pose.then_some(transform),
            profile,
            baselines: Baselines::default(),
            last_symbols: None,
        })
    }

    pub fn profile(&self) -> &StandProfile {
        &self.profile
    }

    pub fn baselines(&self) -> &Baselines {
        &self.baselines
    }

    fn controller(&mut self) -> Result<&mut Connected<C>, SamplingError> {
        self.controller
            .as_mut()
            .ok_or_else(|| SamplingError::Config("no controller connected".into()))
    }

    /// Read one controller symbol.
    pub fn read_symbol(&mut self, name: &str) -> Result<SymbolValue, SamplingError> {
        let controller = self.controller()?;
        controller
            .read_by_name(name)
            .map_err(|e| SamplingError::unavailable(controller.label(), e))
    }

    /// Write one controller symbol.
    pub fn write_symbol(
        &mut self,
        name: &str,
        value: SymbolValue,
        plc_type: PlcType,
    ) -> Result<(), SamplingError> {
        let controller = self.controller()?;
        controller
            .write_by_name(name, value, plc_type)
            .map_err(|e| SamplingError::unavailable(controller.label(), e))
    }

    /// Batch read of the profile's symbols; no call when the list is empty.
    pub fn read_symbols(&mut self) -> Result<SymbolBatch, SamplingError> {
        if self.profile.symbols.is_empty() {
            return Ok(SymbolBatch::new());
        }
        let names = self.profile.symbols.clone();
        let controller = self.controller()?;
        controller
            .read_list_by_name(&names)
            .map_err(|e| SamplingError::unavailable(controller.label(), e))
    }

    /// One displacement read per profile channel, in channel order.
    pub fn read_channels(&mut self) -> Result<Vec<i64>, SamplingError> {
        let mut readings = Vec::with_capacity(self.profile.channels.len());
        for channel in &self.profile.channels {
            let device = &mut self.interferometers[channel.device];
            let value = device
                .axis_displacement(channel.axis)
                .map_err(|e| SamplingError::unavailable(device.label(), e))?;
            readings.push(value);
        }
        Ok(readings)
    }

    fn echo_channels(&mut self, channels: &[i64]) -> Result<(), SamplingError> {
        let symbols = self.profile.echo_symbols.clone();
        for (symbol, &value) in symbols.iter().zip(channels) {
            self.write_symbol(symbol, SymbolValue::Int(value), PlcType::LInt)?;
        }
        Ok(())
    }

    /// Record reference values for offset columns.
    ///
    /// Reads the channels once, then the symbol batch, then each baseline
    /// symbol. The batch also primes [`SensorFusionSampler::flag`].
    pub fn capture_baselines(&mut self) -> Result<&Baselines, SamplingError> {
        let channels = self.read_channels()?;
        let batch = self.read_symbols()?;
        self.last_symbols = Some(batch);

        let mut symbols = HashMap::new();
        for name in self.profile.baseline_symbols.clone() {
            let value = self.read_symbol(&name)?;
            let number = value.as_f64().ok_or_else(|| {
                SamplingError::missing_field(name.as_str(), format!("baseline {value} is not numeric"))
            })?;
            symbols.insert(name, number);
        }

        self.baselines = self.profile.baselines(&channels, symbols, self.divisor);
        info!("Captured baselines: {:?}", self.baselines);
        Ok(&self.baselines)
    }

    /// State of `symbol` in the most recent batch read.
    ///
    /// The first call performs a batch read when no tick has run yet.
    pub fn flag(&mut self, symbol: &str) -> Result<bool, SamplingError> {
        if self.last_symbols.is_none() {
            let batch = self.read_symbols()?;
            self.last_symbols = Some(batch);
        }

        self.last_symbols
            .as_ref()
            .and_then(|batch| batch.get(symbol))
            .and_then(SymbolValue::as_bool)
            .ok_or_else(|| SamplingError::missing_field(symbol, "flag not in symbol batch"))
    }

    /// Start measurement on every interferometer and wait until each one
    /// reports it is running.
    pub fn start_measurement(&mut self, timeout: Duration) -> Result<(), SamplingError> {
        for device in &mut self.interferometers {
            device
                .start_measurement()
                .and_then(|()| {
                    wait_until_in_mode(
                        &mut **device,
                        IdsMode::MeasurementRunning,
                        timeout,
                        MODE_POLL_INTERVAL,
                    )
                })
                .map_err(|e| SamplingError::unavailable(device.label(), e))?;
            debug!("{}: measurement running", device.label());
        }
        Ok(())
    }

    /// Stop measurement on every interferometer.
    pub fn stop_measurement(&mut self) -> Result<(), SamplingError> {
        for device in &mut self.interferometers {
            device
                .stop_measurement()
                .map_err(|e| SamplingError::unavailable(device.label(), e))?;
        }
        Ok(())
    }

    /// Close every connection, reporting the first failure.
    ///
    /// All devices are closed even when one fails.
    pub fn close(mut self) -> Result<(), SamplingError> {
        let mut first_error = None;
        let controller = self.controller.take();

        for mut connection in self.interferometers.drain(..) {
            if let Err(e) = connection.close() {
                first_error.get_or_insert(SamplingError::unavailable(connection.label(), e));
            }
        }
        if let Some(mut connection) = controller {
            if let Err(e) = connection.close() {
                first_error.get_or_insert(SamplingError::unavailable(connection.label(), e));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl<I, C> TickSource for SensorFusionSampler<I, C>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    fn tick(&mut self, index: u64, elapsed: Duration) -> Result<SampleRecord, SamplingError> {
        let symbols = self.read_symbols()?;
        let channels = self.read_channels()?;
        self.echo_channels(&channels)?;

        let pose = match &self.transform {
            Some(transform) => Some(transform.apply_raw(&channels)?),
            None => None,
        };

        let readings = TickReadings {
            symbols,
            channels,
            pose,
        };
        let record =
            self.profile
                .build_record(index, elapsed, &readings, &self.baselines, self.divisor);
        trace!("Tick {index}: {:?}", readings.channels);

        self.last_symbols = Some(readings.symbols);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileKind;
    use crate::sampling::FieldValue;
    use hardware::sim::{
        SimulatedController, SimulatedHardpoint, SimulatedInterferometer, SimulatedStandConfig,
    };
    use meter_math::CalibrationMatrix;

    type SimSampler = SensorFusionSampler<SimulatedInterferometer, SimulatedController>;

    fn quiet_stand() -> SimulatedHardpoint {
        SimulatedHardpoint::new(SimulatedStandConfig {
            noise_pm: 0.0,
            load_noise_n: 0.0,
            tracking_fraction: 1.0,
            busy_reads: 2,
            channel_gains: vec![1.0; 6],
            ..Default::default()
        })
    }

    fn devices(stand: &SimulatedHardpoint) -> Vec<Connected<SimulatedInterferometer>> {
        vec![
            Connected::new(
                "IDS 206",
                SimulatedInterferometer::connect(stand, "192.168.88.206", 0).unwrap(),
            ),
            Connected::new(
                "IDS 207",
                SimulatedInterferometer::connect(stand, "192.168.88.207", 1).unwrap(),
            ),
        ]
    }

    fn controller(stand: &SimulatedHardpoint) -> Connected<SimulatedController> {
        Connected::new(
            "PLC",
            SimulatedController::connect(stand, "10.10.160.129.1.1", 851).unwrap(),
        )
    }

    fn sampler(stand: &SimulatedHardpoint, kind: ProfileKind) -> SimSampler {
        let names = vec!["206".to_string(), "207".to_string()];
        let profile = StandProfile::new(kind, &names).unwrap();
        SensorFusionSampler::new(
            devices(stand),
            Some(controller(stand)),
            profile,
            PoseTransform::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_tick_reads_batch_before_channels() {
        let stand = quiet_stand();
        let mut sampler = sampler(&stand, ProfileKind::Stiffness);
        sampler
            .write_symbol("MAIN.sSetpoint", SymbolValue::Text("26002000".into()), PlcType::String)
            .unwrap();

        let record = sampler.tick(1, Duration::ZERO).unwrap();

        // The batch read moved the actuator, the channels saw the move
        assert_eq!(record.get("206Ch1 [pM]"), Some(&FieldValue::Int(10_000_000)));
        assert_eq!(record.get("ActCount [cts]"), Some(&FieldValue::Int(26_002_000)));
        assert_eq!(record.len(), 33);
    }

    #[test]
    fn test_tick_echoes_channels() {
        let stand = quiet_stand();
        let mut sampler = sampler(&stand, ProfileKind::LoadCell);
        sampler
            .write_symbol("MAIN.sSetpoint", SymbolValue::Text("26000010".into()), PlcType::String)
            .unwrap();

        sampler.tick(1, Duration::ZERO).unwrap();

        assert_eq!(stand.written("MAIN.atto1"), Some(SymbolValue::Int(50_000)));
        assert_eq!(stand.written("MAIN.atto6"), Some(SymbolValue::Int(50_000)));
    }

    #[test]
    fn test_pose_matches_calibration_row_sums() {
        let stand = quiet_stand();
        let mut sampler = sampler(&stand, ProfileKind::Stiffness);
        sampler
            .write_symbol("MAIN.sSetpoint", SymbolValue::Text("26000200".into()), PlcType::String)
            .unwrap();

        let record = sampler.tick(1, Duration::ZERO).unwrap();

        // Every channel reads 1 um, so each component is its column sum
        let calibration = CalibrationMatrix::hardpoint();
        let expected: f64 = (0..6)
            .map(|ch| calibration.coefficient(ch, meter_math::PoseComponent::Z))
            .sum();
        let z = record.get("AttoZ [uM]").and_then(FieldValue::as_f64).unwrap();
        approx::assert_relative_eq!(z, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_flag_follows_last_batch() {
        let stand = quiet_stand();
        let mut sampler = sampler(&stand, ProfileKind::LoadCell);

        assert!(sampler.flag("MAIN.PyLoadBusy").unwrap());
        assert_eq!(stand.batch_reads(), 1);
        sampler.tick(1, Duration::ZERO).unwrap();
        assert!(sampler.flag("MAIN.PyLoadBusy").unwrap());
        sampler.tick(2, Duration::ZERO).unwrap();
        assert!(!sampler.flag("MAIN.PyLoadBusy").unwrap());
        assert_eq!(stand.batch_reads(), 3);
    }

    #[test]
    fn test_calibration_shape_checked() {
        let stand = quiet_stand();
        let names = vec!["206".to_string(), "207".to_string()];
        let profile = StandProfile::new(ProfileKind::Stiffness, &names).unwrap();
        let three_channel = CalibrationMatrix::from_rows(&[[1.0; 6]; 3]);

        let err = SensorFusionSampler::new(
            devices(&stand),
            Some(controller(&stand)),
            profile,
            PoseTransform::new(three_channel, 1e6),
        )
        .err()
        .unwrap();

        assert!(matches!(
            err,
            SamplingError::DimensionMismatch(DimensionMismatch { expected: 3, actual: 6 })
        ));
    }

    #[test]
    fn test_missing_controller_rejected() {
        let stand = quiet_stand();
        let names = vec!["206".to_string(), "207".to_string()];
        let profile = StandProfile::new(ProfileKind::LoadCell, &names).unwrap();

        let result: Result<SimSampler, _> =
            SensorFusionSampler::new(devices(&stand), None, profile, PoseTransform::default());

        assert!(matches!(result, Err(SamplingError::Config(_))));
    }

    #[test]
    fn test_raw_profile_without_controller() {
        let stand = quiet_stand();
        let names = vec!["206".to_string(), "207".to_string()];
        let profile = StandProfile::new(ProfileKind::RawDisplacement, &names).unwrap();
        let mut sampler: SimSampler =
            SensorFusionSampler::new(devices(&stand), None, profile, PoseTransform::default())
                .unwrap();

        let record = sampler.tick(1, Duration::from_millis(20)).unwrap();

        assert_eq!(record.len(), 8);
        assert_eq!(stand.batch_reads(), 0);
    }

    #[test]
    fn test_device_failure_names_device() {
        let stand = quiet_stand();
        let names = vec!["206".to_string(), "207".to_string()];
        let profile = StandProfile::new(ProfileKind::RawDisplacement, &names).unwrap();
        let mut ids = devices(&stand);
        ids[1] = Connected::new(
            "IDS 207",
            SimulatedInterferometer::connect(&stand, "192.168.88.207", 1)
                .unwrap()
                .with_fail_after(1),
        );
        let mut sampler: SimSampler =
            SensorFusionSampler::new(ids, None, profile, PoseTransform::default()).unwrap();

        let err = sampler.tick(1, Duration::ZERO).unwrap_err();

        assert!(
            matches!(err, SamplingError::SourceUnavailable { ref device, .. } if device == "IDS 207")
        );
    }

    #[test]
    fn test_close_releases_everything() {
        let stand = quiet_stand();
        let sampler = sampler(&stand, ProfileKind::LoadCell);
        assert_eq!(stand.open_connections(), 3);

        sampler.close().unwrap();

        assert_eq!(stand.open_connections(), 0);
    }

    #[test]
    fn test_capture_baselines() {
        let stand = quiet_stand();
        let mut sampler = sampler(&stand, ProfileKind::PositionRepeatability);

        let baselines = sampler.capture_baselines().unwrap().clone();

        assert_eq!(baselines.channel_mean, Some(0.0));
        assert_eq!(
            baselines.symbols.get("MAIN.fbPLOOP.fSetpointValue"),
            Some(&26_000_000.0)
        );
    }
}

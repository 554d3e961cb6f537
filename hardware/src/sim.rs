//! Simulated hardpoint stand
//!
//! Provides a [`SimulatedHardpoint`] whose interferometers and controller
//! share one physical model, for dry runs of the acquisition tools and for
//! hardware-free tests.
//!
//! # Model
//!
//! - The actuator encoder moves toward the setpoint written to
//!   `MAIN.sSetpoint` by a fixed fraction on every batch read.
//! - Each interferometer channel reads the actuator travel in picometers,
//!   scaled by a per-channel gain, plus Gaussian noise.
//! - The load cell reads travel × stiffness.
//! - `MAIN.PyLoadBusy` stays true for a configured number of batch reads,
//!   during which the setpoint optionally ramps like a PLC load program.
//!
//! Devices can be made unreachable at connect time or fail after a number of
//! calls, to exercise abort paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use crate::ids::{
    DeviceIdentity, IdsAddress, IdsAxis, IdsError, IdsMode, IdsResult, InterferometerInterface,
};
use crate::plc::{
    check_write_type, AmsAddr, AmsNetId, ControllerInterface, PlcError, PlcResult, PlcType,
    SymbolBatch, SymbolValue,
};
use crate::Disconnect;

/// Channels per simulated interferometer.
const AXES_PER_DEVICE: usize = 3;

/// Mirror encoder travel relative to actuator travel.
const MIRROR_RATIO: f64 = 0.97;

/// Motor counts per actuator encoder count.
const MOTOR_COUNTS_PER_COUNT: f64 = 10.0;

/// Parameters of the simulated stand.
#[derive(Debug, Clone)]
pub struct SimulatedStandConfig {
    /// Value of `MAIN.sSelHPT`
    pub hpt_name: String,
    /// Actuator encoder counts at start
    pub initial_encoder_counts: i64,
    /// Actuator travel per encoder count (pm)
    pub picometers_per_count: f64,
    /// Per-channel displacement gain, in channel order
    pub channel_gains: Vec<f64>,
    /// Interferometer noise standard deviation (pm)
    pub noise_pm: f64,
    /// Load cell noise standard deviation (N)
    pub load_noise_n: f64,
    /// Load per unit actuator travel (N/µm)
    pub stiffness_n_per_um: f64,
    /// Fraction of the remaining setpoint error closed per batch read
    pub tracking_fraction: f64,
    /// Number of batch reads for which `MAIN.PyLoadBusy` reads true
    pub busy_reads: usize,
    /// Setpoint counts added per batch read while `MAIN.PyLoadBusy` is true
    pub load_ramp_counts: f64,
    /// Position loop gain reported by the PLC
    pub kp: f64,
    /// Position loop integral time reported by the PLC
    pub tn: f64,
    /// Addresses (IDS IPs or AMS Net IDs) that refuse connections
    pub unreachable: Vec<String>,
    /// RNG seed
    pub seed: u64,
}

impl Default for SimulatedStandConfig {
    fn default() -> Self {
        Self {
            hpt_name: "HP1".to_string(),
            initial_encoder_counts: 26_000_000,
            picometers_per_count: 5_000.0,
            channel_gains: vec![1.0, 0.98, 1.02, 1.01, 0.99, 1.0],
            noise_pm: 150.0,
            load_noise_n: 0.5,
            stiffness_n_per_um: 100.0,
            tracking_fraction: 0.5,
            busy_reads: 200,
            load_ramp_counts: 0.0,
            kp: 12.0,
            tn: 3.0,
            unreachable: Vec::new(),
            seed: 7,
        }
    }
}

struct HardpointState {
    config: SimulatedStandConfig,
    setpoint_counts: f64,
    actuator_counts: f64,
    batch_reads: usize,
    open_connections: usize,
    written: HashMap<String, SymbolValue>,
    rng: StdRng,
}

impl HardpointState {
    fn travel_um(&self) -> f64 {
        (self.actuator_counts - self.config.initial_encoder_counts as f64)
            * self.config.picometers_per_count
            / 1e6
    }

    fn mm_per_count(&self) -> f64 {
        self.config.picometers_per_count * 1e-9
    }

    fn is_busy(&self) -> bool {
        self.batch_reads <= self.config.busy_reads
    }

    fn step_actuator(&mut self) {
        let error = self.setpoint_counts - self.actuator_counts;
        self.actuator_counts += error * self.config.tracking_fraction;
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        let z: f64 = StandardNormal.sample(&mut self.rng);
        z * std_dev.max(0.0)
    }

    fn load_n(&mut self) -> f64 {
        let noise = self.gaussian(self.config.load_noise_n);
        self.travel_um() * self.config.stiffness_n_per_um + noise
    }

    fn displacement_pm(&mut self, channel: usize) -> i64 {
        let gain = self.config.channel_gains.get(channel).copied().unwrap_or(1.0);
        let travel_pm = self.travel_um() * 1e6;
        let noise = self.gaussian(self.config.noise_pm);
        (travel_pm * gain + noise).round() as i64
    }

    fn model_symbol(&mut self, name: &str) -> Option<SymbolValue> {
        let initial = self.config.initial_encoder_counts as f64;
        let mirror_counts = initial + (self.actuator_counts - initial) * MIRROR_RATIO;
        let mm = self.mm_per_count();
        let error = self.setpoint_counts - self.actuator_counts;

        let value = match name {
            "GVL_TS.ActEncCount" => SymbolValue::Int(self.actuator_counts.round() as i64),
            "MAIN.engActEnc" => SymbolValue::Real(self.actuator_counts * mm),
            "GVL_TS.MirEncCount" => SymbolValue::Int(mirror_counts.round() as i64),
            "MAIN.engMirEnc" => SymbolValue::Real(mirror_counts * mm),
            "GVL_TS.LC_InR" | "MAIN.rb_x" => SymbolValue::Real(self.load_n()),
            "GVL_TS.mtr_pos" => SymbolValue::Int(
                ((self.actuator_counts - initial) * MOTOR_COUNTS_PER_COUNT).round() as i64,
            ),
            "MAIN.mtrRPM" => SymbolValue::Real(error * 0.01),
            "MAIN.mtrCurrent" => SymbolValue::Real(0.2 + error.abs() * 1e-4),
            "MAIN.EncTemp" => SymbolValue::Real(22.5),
            "MAIN.MtrTemp" => SymbolValue::Real(24.0),
            "MAIN.BWYPressPSI" => SymbolValue::Real(14.7),
            "MAIN.FlowRate" => SymbolValue::Real(0.0),
            "MAIN.fbPLOOP.fSetpointValue" => SymbolValue::Real(self.setpoint_counts),
            "MAIN.COARSE_VAL" => SymbolValue::Real(self.actuator_counts * mm),
            "MAIN.sTime" => {
                SymbolValue::Text(chrono::Local::now().format("%H:%M:%S%.3f").to_string())
            }
            "MAIN.PyLoadBusy" => SymbolValue::Bool(self.is_busy()),
            "MAIN.tglSine" | "MAIN.tglROM" | "MAIN.tglStiffness" | "MAIN.tglBWY"
            | "MAIN.tglPLoop" => SymbolValue::Bool(false),
            "MAIN.sp_x" => SymbolValue::Real(
                (self.setpoint_counts - initial) * self.config.picometers_per_count / 1e6
                    * self.config.stiffness_n_per_um,
            ),
            "MAIN.sSelHPT" => SymbolValue::Text(self.config.hpt_name.clone()),
            "MAIN.fbPLOOP.stCTRL_PID_PARAMS.fKp" => SymbolValue::Real(self.config.kp),
            "MAIN.fbPLOOP.stCTRL_PID_PARAMS.tTn" => SymbolValue::Real(self.config.tn),
            _ => return None,
        };
        Some(value)
    }

    fn read_symbol(&mut self, name: &str) -> PlcResult<SymbolValue> {
        if let Some(value) = self.written.get(name) {
            return Ok(value.clone());
        }
        self.model_symbol(name)
            .ok_or_else(|| PlcError::UnknownSymbol(name.to_string()))
    }
}

/// Shared physical model behind the simulated devices.
///
/// Cloning yields another handle to the same stand.
#[derive(Clone)]
pub struct SimulatedHardpoint {
    state: Arc<Mutex<HardpointState>>,
}

impl SimulatedHardpoint {
    pub fn new(config: SimulatedStandConfig) -> Self {
        let setpoint = config.initial_encoder_counts as f64;
        let state = HardpointState {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            setpoint_counts: setpoint,
            actuator_counts: setpoint,
            batch_reads: 0,
            open_connections: 0,
            written: HashMap::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HardpointState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current setpoint in encoder counts.
    pub fn setpoint_counts(&self) -> i64 {
        self.lock().setpoint_counts.round() as i64
    }

    /// Last value written to `name`, if any.
    pub fn written(&self, name: &str) -> Option<SymbolValue> {
        self.lock().written.get(name).cloned()
    }

    /// Number of batch reads served so far.
    pub fn batch_reads(&self) -> usize {
        self.lock().batch_reads
    }

    /// Number of simulated device connections currently open.
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    fn opened(&self) {
        self.lock().open_connections += 1;
    }

    fn closed(&self) {
        let mut state = self.lock();
        state.open_connections = state.open_connections.saturating_sub(1);
    }

    fn is_unreachable(&self, address: &str) -> bool {
        self.lock().config.unreachable.iter().any(|a| a == address)
    }
}

/// Simulated IDS reading `AXES_PER_DEVICE` consecutive stand channels.
pub struct SimulatedInterferometer {
    stand: SimulatedHardpoint,
    address: IdsAddress,
    first_channel: usize,
    mode: IdsMode,
    open: bool,
    calls: usize,
    fail_after: Option<usize>,
}

impl SimulatedInterferometer {
    /// Connect device number `device_index` (0-based) of the stand.
    ///
    /// Channels `3 * device_index .. 3 * device_index + 3` map to its axes.
    pub fn connect(
        stand: &SimulatedHardpoint,
        address: &str,
        device_index: usize,
    ) -> IdsResult<Self> {
        let parsed: IdsAddress = address.parse()?;
        if stand.is_unreachable(address) {
            return Err(IdsError::Connection {
                addr: parsed.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        debug!("Simulated IDS connected at {parsed}");
        stand.opened();

        Ok(Self {
            stand: stand.clone(),
            address: parsed,
            first_channel: device_index * AXES_PER_DEVICE,
            mode: IdsMode::MeasurementRunning,
            open: true,
            calls: 0,
            fail_after: None,
        })
    }

    /// Fail every call after the first `calls` calls.
    pub fn with_fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    fn count_call(&mut self, method: &str) -> IdsResult<()> {
        if !self.open {
            return Err(IdsError::Closed);
        }
        self.calls += 1;
        match self.fail_after {
            Some(limit) if self.calls > limit => Err(IdsError::Rpc {
                method: method.to_string(),
                code: -1,
            }),
            _ => Ok(()),
        }
    }

    fn last_octet(&self) -> u8 {
        match self.address.socket_addr().ip() {
            std::net::IpAddr::V4(ip) => ip.octets()[3],
            std::net::IpAddr::V6(ip) => ip.octets()[15],
        }
    }
}

impl Disconnect for SimulatedInterferometer {
    type Error = IdsError;

    fn disconnect(&mut self) -> Result<(), IdsError> {
        if !self.open {
            return Err(IdsError::Closed);
        }
        self.open = false;
        self.stand.closed();
        debug!("Simulated IDS {} disconnected", self.address);
        Ok(())
    }
}

impl InterferometerInterface for SimulatedInterferometer {
    fn identity(&mut self) -> IdsResult<DeviceIdentity> {
        self.count_call("getDeviceName")?;
        let octet = self.last_octet();
        Ok(DeviceIdentity {
            feature: (1, "Displacement".to_string()),
            serial_number: format!("IDS0{octet:03}"),
            fpga_version: "2.5.1".to_string(),
            mac_address: format!("00:0B:3E:00:00:{octet:02X}"),
            device_type: "IDS3010".to_string(),
            device_name: format!("ids{octet}"),
        })
    }

    fn current_mode(&mut self) -> IdsResult<IdsMode> {
        self.count_call("getCurrentMode")?;
        Ok(self.mode)
    }

    fn start_measurement(&mut self) -> IdsResult<()> {
        self.count_call("startMeasurement")?;
        self.mode = IdsMode::MeasurementRunning;
        Ok(())
    }

    fn stop_measurement(&mut self) -> IdsResult<()> {
        self.count_call("stopMeasurement")?;
        self.mode = IdsMode::SystemIdle;
        Ok(())
    }

    fn axis_displacement(&mut self, axis: IdsAxis) -> IdsResult<i64> {
        self.count_call("getAxisDisplacement")?;
        if self.mode != IdsMode::MeasurementRunning {
            return Err(IdsError::Rpc {
                method: "getAxisDisplacement".to_string(),
                code: 2,
            });
        }
        let channel = self.first_channel + axis.index() as usize;
        Ok(self.stand.lock().displacement_pm(channel))
    }
}

/// Simulated TwinCAT controller over the stand model.
pub struct SimulatedController {
    stand: SimulatedHardpoint,
    target: AmsAddr,
    open: bool,
    calls: usize,
    fail_after: Option<usize>,
}

impl SimulatedController {
    /// Open a connection to `net_id:port`.
    pub fn connect(stand: &SimulatedHardpoint, net_id: &str, port: u16) -> PlcResult<Self> {
        let parsed: AmsNetId = net_id.parse()?;
        let target = AmsAddr::new(parsed, port);
        if stand.is_unreachable(net_id) {
            return Err(PlcError::Connection {
                addr: target.to_string(),
                reason: "ADS target port not found".to_string(),
            });
        }
        debug!("Simulated PLC connected at {target}");
        stand.opened();

        Ok(Self {
            stand: stand.clone(),
            target,
            open: true,
            calls: 0,
            fail_after: None,
        })
    }

    /// Fail every call after the first `calls` calls.
    pub fn with_fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Address this connection targets.
    pub fn target(&self) -> AmsAddr {
        self.target
    }

    fn count_call(&mut self) -> PlcResult<()> {
        if !self.open {
            return Err(PlcError::Closed);
        }
        self.calls += 1;
        match self.fail_after {
            Some(limit) if self.calls > limit => {
                Err(PlcError::Request("ADS device not responding".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl Disconnect for SimulatedController {
    type Error = PlcError;

    fn disconnect(&mut self) -> Result<(), PlcError> {
        if !self.open {
            return Err(PlcError::Closed);
        }
        self.open = false;
        self.stand.closed();
        debug!("Simulated PLC {} disconnected", self.target);
        Ok(())
    }
}

impl ControllerInterface for SimulatedController {
    fn local_address(&self) -> AmsAddr {
        AmsAddr::new(AmsNetId::new([192, 168, 88, 10, 1, 1]), 32_905)
    }

    fn read_by_name(&mut self, name: &str) -> PlcResult<SymbolValue> {
        self.count_call()?;
        self.stand.lock().read_symbol(name)
    }

    fn read_list_by_name(&mut self, names: &[String]) -> PlcResult<SymbolBatch> {
        self.count_call()?;
        let mut state = self.stand.lock();
        state.batch_reads += 1;
        if state.is_busy() {
            let ramp = state.config.load_ramp_counts;
            state.setpoint_counts += ramp;
        }
        state.step_actuator();

        let mut batch = SymbolBatch::with_capacity(names.len());
        for name in names {
            let value = state.read_symbol(name)?;
            batch.insert(name.clone(), value);
        }
        Ok(batch)
    }

    fn write_by_name(
        &mut self,
        name: &str,
        value: SymbolValue,
        plc_type: PlcType,
    ) -> PlcResult<()> {
        self.count_call()?;
        check_write_type(name, &value, plc_type)?;

        let mut state = self.stand.lock();
        if name == "MAIN.sSetpoint" {
            let counts = value.as_i64().ok_or_else(|| PlcError::TypeMismatch {
                symbol: name.to_string(),
                expected: PlcType::String,
                actual: format!("non-numeric setpoint {value:?}"),
            })?;
            state.setpoint_counts = counts as f64;
        }
        state.written.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_stand() -> SimulatedHardpoint {
        SimulatedHardpoint::new(SimulatedStandConfig {
            noise_pm: 0.0,
            load_noise_n: 0.0,
            tracking_fraction: 1.0,
            busy_reads: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_setpoint_moves_actuator_and_channels() {
        let stand = quiet_stand();
        let mut plc = SimulatedController::connect(&stand, "10.10.160.129.1.1", 851).unwrap();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.206", 0).unwrap();

        plc.write_by_name("MAIN.sSetpoint", SymbolValue::Text("26002000".into()), PlcType::String)
            .unwrap();
        let batch = plc
            .read_list_by_name(&["GVL_TS.ActEncCount".to_string(), "GVL_TS.LC_InR".to_string()])
            .unwrap();

        assert_eq!(batch["GVL_TS.ActEncCount"], SymbolValue::Int(26_002_000));
        // 2000 counts * 5000 pm = 10 um
        assert_eq!(ids.axis_displacement(IdsAxis::Axis0).unwrap(), 10_000_000);
        assert_eq!(ids.axis_displacement(IdsAxis::Axis1).unwrap(), 9_800_000);
        let load = batch["GVL_TS.LC_InR"].as_f64().unwrap();
        assert!((load - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_busy_flag_clears() {
        let stand = quiet_stand();
        let mut plc = SimulatedController::connect(&stand, "10.10.160.129.1.1", 851).unwrap();
        let names = vec!["MAIN.PyLoadBusy".to_string()];

        let flags: Vec<bool> = (0..4)
            .map(|_| plc.read_list_by_name(&names).unwrap()["MAIN.PyLoadBusy"].as_bool().unwrap())
            .collect();

        assert_eq!(flags, vec![true, true, false, false]);
    }

    #[test]
    fn test_load_ramp_stops_when_idle() {
        let stand = SimulatedHardpoint::new(SimulatedStandConfig {
            busy_reads: 2,
            load_ramp_counts: 100.0,
            ..Default::default()
        });
        let mut plc = SimulatedController::connect(&stand, "10.10.160.129.1.1", 851).unwrap();
        let names = vec!["MAIN.PyLoadBusy".to_string()];

        for _ in 0..5 {
            plc.read_list_by_name(&names).unwrap();
        }

        assert_eq!(stand.setpoint_counts(), 26_000_200);
    }

    #[test]
    fn test_second_device_maps_to_upper_channels() {
        let stand = SimulatedHardpoint::new(SimulatedStandConfig {
            noise_pm: 0.0,
            tracking_fraction: 1.0,
            channel_gains: vec![1.0, 1.0, 1.0, 2.0, 3.0, 4.0],
            ..Default::default()
        });
        let mut plc = SimulatedController::connect(&stand, "10.10.160.129.1.1", 851).unwrap();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.207", 1).unwrap();

        plc.write_by_name("MAIN.sSetpoint", SymbolValue::Text("26000001".into()), PlcType::String)
            .unwrap();
        plc.read_list_by_name(&[]).unwrap();

        assert_eq!(ids.axis_displacement(IdsAxis::Axis2).unwrap(), 20_000);
    }

    #[test]
    fn test_unknown_symbol() {
        let stand = quiet_stand();
        let mut plc = SimulatedController::connect(&stand, "10.10.160.129.1.1", 851).unwrap();

        let err = plc.read_by_name("MAIN.doesNotExist").unwrap_err();

        assert_eq!(err, PlcError::UnknownSymbol("MAIN.doesNotExist".to_string()));
    }

    #[test]
    fn test_unreachable_devices_refuse() {
        let stand = SimulatedHardpoint::new(SimulatedStandConfig {
            unreachable: vec!["192.168.88.207".to_string(), "10.10.16.17.1.1".to_string()],
            ..Default::default()
        });

        assert!(matches!(
            SimulatedInterferometer::connect(&stand, "192.168.88.207", 1),
            Err(IdsError::Connection { .. })
        ));
        assert!(matches!(
            SimulatedController::connect(&stand, "10.10.16.17.1.1", 851),
            Err(PlcError::Connection { .. })
        ));
        assert!(SimulatedInterferometer::connect(&stand, "192.168.88.206", 0).is_ok());
    }

    #[test]
    fn test_fault_injection() {
        let stand = quiet_stand();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.206", 0)
            .unwrap()
            .with_fail_after(2);

        assert!(ids.axis_displacement(IdsAxis::Axis0).is_ok());
        assert!(ids.axis_displacement(IdsAxis::Axis1).is_ok());
        assert!(matches!(
            ids.axis_displacement(IdsAxis::Axis0),
            Err(IdsError::Rpc { code: -1, .. })
        ));
    }

    #[test]
    fn test_closed_device_rejects_calls() {
        let stand = quiet_stand();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.206", 0).unwrap();

        assert_eq!(stand.open_connections(), 1);
        ids.disconnect().unwrap();

        assert_eq!(stand.open_connections(), 0);
        assert_eq!(ids.axis_displacement(IdsAxis::Axis0), Err(IdsError::Closed));
        assert_eq!(ids.disconnect(), Err(IdsError::Closed));
    }

    #[test]
    fn test_stopped_measurement_rejects_reads() {
        let stand = quiet_stand();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.206", 0).unwrap();

        ids.stop_measurement().unwrap();

        assert_eq!(ids.current_mode().unwrap(), IdsMode::SystemIdle);
        assert!(ids.axis_displacement(IdsAxis::Axis0).is_err());
    }

    #[test]
    fn test_identity() {
        let stand = quiet_stand();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.206", 0).unwrap();

        let identity = ids.identity().unwrap();

        assert_eq!(identity.device_name, "ids206");
        assert_eq!(identity.mac_address, "00:0B:3E:00:00:CE");
    }

    #[test]
    fn test_wait_until_in_mode() {
        let stand = quiet_stand();
        let mut ids = SimulatedInterferometer::connect(&stand, "192.168.88.206", 0).unwrap();

        crate::wait_until_in_mode(
            &mut ids,
            IdsMode::MeasurementRunning,
            std::time::Duration::from_millis(10),
            std::time::Duration::from_millis(1),
        )
        .unwrap();

        let err = crate::wait_until_in_mode(
            &mut ids,
            IdsMode::SystemIdle,
            std::time::Duration::from_millis(5),
            std::time::Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(err, IdsError::ModeTimeout { .. }));
    }
}

//! attocube IDS3010 Displacement Interferometer Interface
//!
//! The IDS is a three-axis laser displacement interferometer reached over a
//! JSON-RPC socket. This module models the parts of its API the test stand
//! uses: identity queries for diagnostics, measurement start/stop, the
//! current operating mode, and per-axis displacement readout in picometers.
//!
//! The RPC transport itself lives outside this crate; anything that can
//! answer [`InterferometerInterface`] calls can drive a sampling session.
//! [`crate::sim::SimulatedInterferometer`] is the in-tree implementation.
//!
//! # Connection
//!
//! Devices listen on TCP port 9090. Stand devices are addressed by IP only,
//! see [`IdsAddress`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::Disconnect;

/// Default IDS JSON-RPC port.
pub const DEFAULT_IDS_PORT: u16 = 9090;

/// Polling interval used by [`wait_until_in_mode`].
pub const MODE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors returned by interferometer operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdsError {
    /// Address could not be parsed
    #[error("invalid IDS address: {0}")]
    InvalidAddress(String),

    /// Device unreachable or refused the connection
    #[error("failed to connect to IDS at {addr}: {reason}")]
    Connection { addr: String, reason: String },

    /// Axis number outside 0..=2
    #[error("invalid IDS axis {0} (valid: 0-2)")]
    InvalidAxis(u8),

    /// Remote procedure returned a non-zero error number
    #[error("IDS call {method} failed with error {code}")]
    Rpc { method: String, code: i32 },

    /// Device reported an unknown operating mode string
    #[error("unknown IDS mode: {0}")]
    UnknownMode(String),

    /// Connection already closed
    #[error("IDS connection closed")]
    Closed,

    /// Timed out waiting for a mode transition
    #[error("timed out after {waited:?} waiting for mode {target}")]
    ModeTimeout { target: IdsMode, waited: Duration },
}

/// Result alias for interferometer operations.
pub type IdsResult<T> = Result<T, IdsError>;

/// One measurement axis of an IDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdsAxis {
    Axis0,
    Axis1,
    Axis2,
}

impl IdsAxis {
    /// All axes in readout order.
    pub const ALL: [IdsAxis; 3] = [IdsAxis::Axis0, IdsAxis::Axis1, IdsAxis::Axis2];

    /// Numeric axis index as used on the wire.
    pub fn index(self) -> u8 {
        match self {
            IdsAxis::Axis0 => 0,
            IdsAxis::Axis1 => 1,
            IdsAxis::Axis2 => 2,
        }
    }
}

impl TryFrom<u8> for IdsAxis {
    type Error = IdsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IdsAxis::Axis0),
            1 => Ok(IdsAxis::Axis1),
            2 => Ok(IdsAxis::Axis2),
            other => Err(IdsError::InvalidAxis(other)),
        }
    }
}

impl fmt::Display for IdsAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Operating mode reported by `getCurrentMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdsMode {
    SystemIdle,
    MeasurementStarting,
    MeasurementRunning,
    OpticsAlignmentStarting,
    OpticsAlignmentRunning,
    PilotLaserEnabled,
    TestChannelsEnabled,
}

impl IdsMode {
    /// Mode string as reported by the device.
    pub fn as_str(self) -> &'static str {
        match self {
            IdsMode::SystemIdle => "system idle",
            IdsMode::MeasurementStarting => "measurement starting",
            IdsMode::MeasurementRunning => "measurement running",
            IdsMode::OpticsAlignmentStarting => "optics alignment starting",
            IdsMode::OpticsAlignmentRunning => "optics alignment running",
            IdsMode::PilotLaserEnabled => "pilot laser enabled",
            IdsMode::TestChannelsEnabled => "test channels enabled",
        }
    }
}

impl FromStr for IdsMode {
    type Err = IdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim() {
            "system idle" => IdsMode::SystemIdle,
            "measurement starting" => IdsMode::MeasurementStarting,
            "measurement running" => IdsMode::MeasurementRunning,
            "optics alignment starting" => IdsMode::OpticsAlignmentStarting,
            "optics alignment running" => IdsMode::OpticsAlignmentRunning,
            "pilot laser enabled" => IdsMode::PilotLaserEnabled,
            "test channels enabled" => IdsMode::TestChannelsEnabled,
            other => return Err(IdsError::UnknownMode(other.to_string())),
        };
        Ok(mode)
    }
}

impl fmt::Display for IdsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Socket address of an IDS, defaulting to [`DEFAULT_IDS_PORT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdsAddress(SocketAddr);

impl IdsAddress {
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl FromStr for IdsAddress {
    type Err = IdsError;

    /// Accepts `192.168.88.206` or `192.168.88.206:9090`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self(addr));
        }
        let ip: IpAddr = s
            .parse()
            .map_err(|_| IdsError::InvalidAddress(s.to_string()))?;
        Ok(Self(SocketAddr::new(ip, DEFAULT_IDS_PORT)))
    }
}

impl fmt::Display for IdsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity strings read at connect time, for diagnostic logging only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceIdentity {
    /// First activated feature (number, name)
    pub feature: (i32, String),
    pub serial_number: String,
    pub fpga_version: String,
    pub mac_address: String,
    pub device_type: String,
    pub device_name: String,
}

impl DeviceIdentity {
    /// Log every identity field at info level.
    pub fn log(&self, label: &str) {
        info!(
            "{label}: {} (type {}, serial {}, FPGA {}, MAC {}, feature {} {:?})",
            self.device_name,
            self.device_type,
            self.serial_number,
            self.fpga_version,
            self.mac_address,
            self.feature.0,
            self.feature.1
        );
    }
}

/// Operations the test stand needs from a displacement interferometer.
///
/// Each call is one blocking remote procedure; there is no batched
/// multi-axis read in use, so a tick costs one round trip per channel.
pub trait InterferometerInterface: Disconnect<Error = IdsError> {
    /// Read identity strings (serial, firmware, MAC, ...).
    fn identity(&mut self) -> IdsResult<DeviceIdentity>;

    /// Current operating mode.
    fn current_mode(&mut self) -> IdsResult<IdsMode>;

    /// Start position measurement.
    fn start_measurement(&mut self) -> IdsResult<()>;

    /// Stop position measurement.
    fn stop_measurement(&mut self) -> IdsResult<()>;

    /// Relative displacement of one axis in picometers.
    fn axis_displacement(&mut self, axis: IdsAxis) -> IdsResult<i64>;
}

/// Block until the device reports `target`, polling every `poll`.
///
/// # Errors
/// Returns [`IdsError::ModeTimeout`] if `timeout` elapses first, or any
/// error from the mode query itself.
pub fn wait_until_in_mode<D: InterferometerInterface + ?Sized>(
    device: &mut D,
    target: IdsMode,
    timeout: Duration,
    poll: Duration,
) -> IdsResult<()> {
    let start = Instant::now();

    loop {
        let mode = device.current_mode()?;
        if mode == target {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(IdsError::ModeTimeout {
                target,
                waited: start.elapsed(),
            });
        }
        debug!("IDS in mode '{mode}', waiting for '{target}'");
        std::thread::sleep(poll);
    }
}

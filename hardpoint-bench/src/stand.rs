//! Opening stand connections
//!
//! Device transports sit behind [`DeviceFactory`]. Every connection comes
//! back wrapped in [`Connected`], so an early failure closes whatever was
//! already open.

use hardware::sim::{SimulatedController, SimulatedHardpoint, SimulatedInterferometer};
use hardware::{
    Connected, ControllerInterface, IdsResult, InterferometerInterface, PlcResult,
};
use tracing::info;

use crate::config::{ControllerConfig, InterferometerConfig, StandConfig};
use crate::SamplingError;

/// Opens device connections for a stand.
pub trait DeviceFactory {
    type Interferometer: InterferometerInterface + 'static;
    type Controller: ControllerInterface + 'static;

    /// Connect interferometer number `index` of the configuration.
    fn connect_interferometer(
        &self,
        index: usize,
        config: &InterferometerConfig,
    ) -> IdsResult<Self::Interferometer>;

    fn connect_controller(&self, config: &ControllerConfig) -> PlcResult<Self::Controller>;
}

impl DeviceFactory for SimulatedHardpoint {
    type Interferometer = SimulatedInterferometer;
    type Controller = SimulatedController;

    fn connect_interferometer(
        &self,
        index: usize,
        config: &InterferometerConfig,
    ) -> IdsResult<SimulatedInterferometer> {
        SimulatedInterferometer::connect(self, &config.address, index)
    }

    fn connect_controller(&self, config: &ControllerConfig) -> PlcResult<SimulatedController> {
        SimulatedController::connect(self, &config.net_id, config.port)
    }
}

/// Connect every configured interferometer, logging each identity.
///
/// # Errors
/// [`SamplingError::ConnectionFailure`] naming the first device that could
/// not be opened. Devices opened before it are closed.
pub fn connect_interferometers<F: DeviceFactory>(
    factory: &F,
    config: &StandConfig,
) -> Result<Vec<Connected<F::Interferometer>>, SamplingError> {
    let mut devices = Vec::with_capacity(config.interferometers.len());

    for (index, device) in config.interferometers.iter().enumerate() {
        let label = format!("IDS {}", device.name);
        info!("Connecting to {label} at {}...", device.address);

        let mut connection = factory
            .connect_interferometer(index, device)
            .map(|d| Connected::new(label.clone(), d))
            .map_err(|e| SamplingError::connection(label.as_str(), e))?;
        let identity = connection
            .identity()
            .map_err(|e| SamplingError::connection(label.as_str(), e))?;
        identity.log(&label);

        devices.push(connection);
    }
    Ok(devices)
}

/// Connect the PLC.
pub fn connect_controller<F: DeviceFactory>(
    factory: &F,
    config: &StandConfig,
) -> Result<Connected<F::Controller>, SamplingError> {
    let label = format!("PLC {}:{}", config.controller.net_id, config.controller.port);
    info!("Connecting to hardpoint test stand at {}...", config.controller.net_id);

    let controller = factory
        .connect_controller(&config.controller)
        .map_err(|e| SamplingError::connection(label.as_str(), e))?;
    info!("Local address: {}", controller.local_address());

    Ok(Connected::new(label, controller))
}

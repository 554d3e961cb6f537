//! Shared fixtures for stand integration tests

#![allow(dead_code)]

use std::path::Path;

use hardpoint_bench::config::{ControllerConfig, InterferometerConfig};
use hardpoint_bench::stand::DeviceFactory;
use hardpoint_bench::StandConfig;
use hardware::sim::{
    SimulatedController, SimulatedHardpoint, SimulatedInterferometer, SimulatedStandConfig,
};
use hardware::{IdsResult, PlcResult};

/// Noise-free stand whose actuator reaches each setpoint in one batch read.
pub fn quiet_stand() -> SimulatedHardpoint {
    SimulatedHardpoint::new(quiet_config())
}

pub fn quiet_config() -> SimulatedStandConfig {
    SimulatedStandConfig {
        noise_pm: 0.0,
        load_noise_n: 0.0,
        tracking_fraction: 1.0,
        channel_gains: vec![1.0; 6],
        ..Default::default()
    }
}

/// Default stand configuration writing into `dir`.
pub fn stand_config(dir: &Path) -> StandConfig {
    StandConfig {
        output_dir: dir.join("results"),
        ..Default::default()
    }
}

/// Simulated stand whose interferometers fail after a number of calls.
pub struct FlakyStand {
    pub stand: SimulatedHardpoint,
    pub interferometer_calls: usize,
}

impl DeviceFactory for FlakyStand {
    type Interferometer = SimulatedInterferometer;
    type Controller = SimulatedController;

    fn connect_interferometer(
        &self,
        index: usize,
        config: &InterferometerConfig,
    ) -> IdsResult<SimulatedInterferometer> {
        SimulatedInterferometer::connect(&self.stand, &config.address, index)
            .map(|device| device.with_fail_after(self.interferometer_calls))
    }

    fn connect_controller(&self, config: &ControllerConfig) -> PlcResult<SimulatedController> {
        SimulatedController::connect(&self.stand, &config.net_id, config.port)
    }
}

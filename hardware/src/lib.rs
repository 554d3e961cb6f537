//! Device seams for the hardpoint test stand
//!
//! - [`ids`] - attocube IDS displacement interferometers
//! - [`plc`] - TwinCAT PLC symbol access
//! - [`sim`] - Simulated stand implementing both interfaces
//!
//! Connections are owned through [`Connected`], which guarantees the device
//! is disconnected when the owner goes out of scope.

mod connection;
pub mod ids;
pub mod plc;
pub mod sim;

pub use connection::{Connected, Disconnect};
pub use ids::{
    wait_until_in_mode, DeviceIdentity, IdsAddress, IdsAxis, IdsError, IdsMode, IdsResult,
    InterferometerInterface, DEFAULT_IDS_PORT,
};
pub use plc::{
    AmsAddr, AmsNetId, ControllerInterface, PlcError, PlcResult, PlcType, SymbolBatch,
    SymbolValue, DEFAULT_ADS_PORT,
};

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod lane;
pub mod pid;
pub mod thermostat;
pub mod types;

#[cfg(test)]
mod mock;

pub use clock::{Clock, DilatedClock, SystemClock};
pub use config::{DeviceConfig, LaneConfig, RuntimeConfig, ThermostatConfig};
pub use device::{Actuator, Devices, Thermometer};
pub use error::{error_chain, ConfigError, DeviceError, Switch, ThermostatError};
pub use lane::{plan_cycle, CyclePlan, Lane};
pub use pid::PidController;
pub use thermostat::{ActiveRun, Thermostat};
pub use types::{LaneEvent, LaneEventKind, LaneState, LaneStatus, StatusTracker, ThermostatStatus};

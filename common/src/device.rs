use std::sync::Arc;

use crate::error::DeviceError;

/// A sensor that reports the controlled temperature in degrees Celsius.
pub trait Thermometer: Send + Sync {
    fn read(&self) -> Result<f64, DeviceError>;
}

/// A switchable device such as a chiller compressor or a heating pad.
///
/// Implementations must tolerate `off` on an actuator that is already off.
pub trait Actuator: Send + Sync {
    fn on(&self) -> Result<(), DeviceError>;
    fn off(&self) -> Result<(), DeviceError>;
}

/// The hardware a thermostat drives.
#[derive(Clone)]
pub struct Devices {
    pub thermometer: Arc<dyn Thermometer>,
    pub chiller: Arc<dyn Actuator>,
    pub heater: Arc<dyn Actuator>,
}

impl Devices {
    pub fn new(
        thermometer: Arc<dyn Thermometer>,
        chiller: Arc<dyn Actuator>,
        heater: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            thermometer,
            chiller,
            heater,
        }
    }
}

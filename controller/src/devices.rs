use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chamber_common::{Actuator, DeviceConfig, DeviceError, Devices, Thermometer};
use tracing::{debug, info};

/// Relay driven through the sysfs GPIO interface.
#[derive(Debug)]
pub struct GpioActuator {
    pin: u32,
    value_path: PathBuf,
}

impl GpioActuator {
    /// Exports `pin` if needed and configures it as an output.
    pub fn open(gpio_root: impl AsRef<Path>, pin: u32) -> Result<Self, DeviceError> {
        let root = gpio_root.as_ref();
        let pin_dir = root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            let export = root.join("export");
            fs::write(&export, pin.to_string()).map_err(|err| DeviceError::io(&export, err))?;
            debug!("exported gpio {pin}");
        }

        let direction = pin_dir.join("direction");
        fs::write(&direction, "out").map_err(|err| DeviceError::io(&direction, err))?;

        Ok(Self {
            pin,
            value_path: pin_dir.join("value"),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn set(&self, level: &str) -> Result<(), DeviceError> {
        fs::write(&self.value_path, level).map_err(|err| DeviceError::io(&self.value_path, err))
    }
}

impl Actuator for GpioActuator {
    fn on(&self) -> Result<(), DeviceError> {
        self.set("1")
    }

    fn off(&self) -> Result<(), DeviceError> {
        self.set("0")
    }
}

/// DS18B20 sensor on the 1-wire bus.
#[derive(Debug)]
pub struct Ds18b20 {
    slave_path: PathBuf,
}

impl Ds18b20 {
    pub fn new(w1_root: impl AsRef<Path>, id: &str) -> Self {
        Self {
            slave_path: w1_root.as_ref().join(id).join("w1_slave"),
        }
    }
}

impl Thermometer for Ds18b20 {
    fn read(&self) -> Result<f64, DeviceError> {
        let raw = fs::read_to_string(&self.slave_path)
            .map_err(|err| DeviceError::io(&self.slave_path, err))?;
        parse_w1_slave(&raw)
    }
}

/// Parses the two line `w1_slave` format:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
fn parse_w1_slave(raw: &str) -> Result<f64, DeviceError> {
    let mut lines = raw.lines();

    let crc_ok = lines
        .next()
        .is_some_and(|line| line.trim_end().ends_with("YES"));
    if !crc_ok {
        return Err(DeviceError::InvalidReading("crc check failed".to_string()));
    }

    let millis = lines
        .next()
        .and_then(|line| line.rsplit_once("t="))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| DeviceError::InvalidReading("missing t= field".to_string()))?;

    let millis: i64 = millis
        .parse()
        .map_err(|_| DeviceError::InvalidReading(format!("bad temperature {millis:?}")))?;

    Ok(millis as f64 / 1000.0)
}

/// Opens the thermometer and both relays described by `config`.
pub fn open(config: &DeviceConfig) -> Result<Devices, DeviceError> {
    let thermometer = Ds18b20::new(&config.w1_path, &config.thermometer_id);
    let chiller = GpioActuator::open(&config.gpio_path, config.chiller_pin)?;
    let heater = GpioActuator::open(&config.gpio_path, config.heater_pin)?;

    // Start from a known state.
    chiller.off()?;
    heater.off()?;
    info!(
        "chiller on gpio {}, heater on gpio {}, thermometer {}",
        chiller.pin(),
        heater.pin(),
        config.thermometer_id
    );

    Ok(Devices::new(
        Arc::new(thermometer),
        Arc::new(chiller),
        Arc::new(heater),
    ))
}

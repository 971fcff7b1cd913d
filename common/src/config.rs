use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, lane::Lane};

const MIN_CYCLE_PERIOD_MS: u64 = 1;

/// Tuning for one actuator's duty-cycle lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Length of one on/off period.
    pub cycle_period_ms: u64,
    /// Shortest time the actuator is left on once switched on.
    pub minimum_run_ms: u64,
}

impl LaneConfig {
    /// Compressors need long rests, so the chiller runs long cycles with a
    /// ten minute floor.
    pub fn chiller() -> Self {
        Self {
            kp: -10.0,
            ki: 0.0,
            kd: 0.0,
            cycle_period_ms: 30 * 60_000,
            minimum_run_ms: 10 * 60_000,
        }
    }

    pub fn heater() -> Self {
        Self {
            kp: 10.0,
            ki: 0.0,
            kd: 0.0,
            cycle_period_ms: 11 * 60_000,
            minimum_run_ms: 10_000,
        }
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    pub fn minimum_run(&self) -> Duration {
        Duration::from_millis(self.minimum_run_ms)
    }

    pub fn sanitize(&mut self) {
        self.cycle_period_ms = self.cycle_period_ms.max(MIN_CYCLE_PERIOD_MS);
        self.minimum_run_ms = self.minimum_run_ms.min(self.cycle_period_ms);
    }

    fn validate(&self, lane: Lane) -> Result<(), ConfigError> {
        for (gain, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidGain { lane, gain });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatConfig {
    /// Label attached to every log line of this thermostat.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "LaneConfig::chiller")]
    pub chiller: LaneConfig,
    #[serde(default = "LaneConfig::heater")]
    pub heater: LaneConfig,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            chiller: LaneConfig::chiller(),
            heater: LaneConfig::heater(),
        }
    }
}

impl ThermostatConfig {
    pub fn lane(&self, lane: Lane) -> &LaneConfig {
        match lane {
            Lane::Chiller => &self.chiller,
            Lane::Heater => &self.heater,
        }
    }

    pub fn sanitize(&mut self) {
        self.chiller.sanitize();
        self.heater.sanitize();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chiller.validate(Lane::Chiller)?;
        self.heater.validate(Lane::Heater)
    }
}

fn default_name() -> String {
    "chamber".to_string()
}

/// Where the controller finds its hardware on a Raspberry Pi style host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 1-wire id of the DS18B20 sensor, e.g. `28-0316a2791bff`.
    pub thermometer_id: String,
    pub chiller_pin: u32,
    pub heater_pin: u32,
    #[serde(default = "default_w1_path")]
    pub w1_path: String,
    #[serde(default = "default_gpio_path")]
    pub gpio_path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            thermometer_id: String::new(),
            chiller_pin: 17,
            heater_pin: 27,
            w1_path: default_w1_path(),
            gpio_path: default_gpio_path(),
        }
    }
}

fn default_w1_path() -> String {
    "/sys/bus/w1/devices".to_string()
}

fn default_gpio_path() -> String {
    "/sys/class/gpio".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Runs the lanes on a dilated clock when set; meant for bench testing.
    #[serde(default)]
    pub clock_multiplier: Option<f64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            devices: DeviceConfig::default(),
            http_port: default_http_port(),
            clock_multiplier: None,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
        if self.http_port == 0 {
            self.http_port = default_http_port();
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

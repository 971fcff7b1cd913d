use std::{fmt, io, path::PathBuf};

use thiserror::Error;
use tokio::task::JoinError;

use crate::lane::Lane;

/// Failure reported by a thermometer or actuator implementation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("{0}")]
    Fault(String),
}

impl DeviceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("clock multiplier must be between 0.001 and 1000000, got {0}")]
    InvalidMultiplier(f64),
    #[error("{lane} {gain} gain must be finite")]
    InvalidGain { lane: Lane, gain: &'static str },
}

/// Which actuator transition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    OffAfterDuty,
    OffOnQuit,
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::OffAfterDuty => "off after duty cycle",
            Self::OffOnQuit => "off while quitting",
        })
    }
}

#[derive(Debug, Error)]
pub enum ThermostatError {
    #[error("thermostat is already on")]
    AlreadyOn,
    #[error("setpoint must be finite, got {0}")]
    InvalidSetpoint(f64),
    #[error("{lane} lane could not read thermometer")]
    Read {
        lane: Lane,
        #[source]
        source: DeviceError,
    },
    #[error("{lane} lane could not turn actuator {switch}")]
    Actuator {
        lane: Lane,
        switch: Switch,
        #[source]
        source: DeviceError,
    },
    #[error("lane task failed")]
    Task(#[from] JoinError),
}

/// Renders an error followed by each of its sources, separated by `: `.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

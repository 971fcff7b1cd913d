use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    device::{Actuator, Thermometer},
    error::DeviceError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    On,
    Off,
}

#[derive(Debug, Default)]
struct ThermometerState {
    value: f64,
    reads: usize,
    fail_after: Option<usize>,
    error: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MockThermometer {
    state: Mutex<ThermometerState>,
}

impl MockThermometer {
    pub(crate) fn constant(value: f64) -> Self {
        Self {
            state: Mutex::new(ThermometerState {
                value,
                ..ThermometerState::default()
            }),
        }
    }

    /// Returns `value` for the first `good_reads` reads and fails afterwards.
    pub(crate) fn failing_after(value: f64, good_reads: usize, message: &str) -> Self {
        Self {
            state: Mutex::new(ThermometerState {
                value,
                fail_after: Some(good_reads),
                error: Some(message.to_string()),
                ..ThermometerState::default()
            }),
        }
    }

    pub(crate) fn fail_now(&self, message: &str) {
        let mut state = self.lock();
        state.fail_after = Some(state.reads);
        state.error = Some(message.to_string());
    }

    pub(crate) fn reads(&self) -> usize {
        self.lock().reads
    }

    fn lock(&self) -> MutexGuard<'_, ThermometerState> {
        self.state.lock().unwrap()
    }
}

impl Thermometer for MockThermometer {
    fn read(&self) -> Result<f64, DeviceError> {
        let mut state = self.lock();
        let failing = state.fail_after.is_some_and(|limit| state.reads >= limit);
        state.reads += 1;

        match (failing, &state.error) {
            (true, Some(message)) => Err(DeviceError::Fault(message.clone())),
            _ => Ok(state.value),
        }
    }
}

#[derive(Debug, Default)]
struct ActuatorState {
    calls: Vec<(Call, Instant)>,
    fail_on: Option<String>,
    fail_off: Option<String>,
}

/// Records every switch together with the (paused) tokio time it happened at.
#[derive(Debug, Default)]
pub(crate) struct MockActuator {
    state: Mutex<ActuatorState>,
}

impl MockActuator {
    pub(crate) fn fail_on(&self, message: &str) {
        self.lock().fail_on = Some(message.to_string());
    }

    pub(crate) fn fail_off(&self, message: &str) {
        self.lock().fail_off = Some(message.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.iter().map(|(call, _)| *call).collect()
    }

    pub(crate) fn count(&self, call: Call) -> usize {
        self.lock().calls.iter().filter(|(c, _)| *c == call).count()
    }

    /// Time between each `on` and the `off` that followed it.
    pub(crate) fn on_durations(&self) -> Vec<Duration> {
        self.lock()
            .calls
            .windows(2)
            .filter_map(|pair| match pair {
                [(Call::On, on), (Call::Off, off)] => Some(off.duration_since(*on)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.calls.push((call, Instant::now()));

        let failure = match call {
            Call::On => &state.fail_on,
            Call::Off => &state.fail_off,
        };
        match failure {
            Some(message) => Err(DeviceError::Fault(message.clone())),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActuatorState> {
        self.state.lock().unwrap()
    }
}

impl Actuator for MockActuator {
    fn on(&self) -> Result<(), DeviceError> {
        self.record(Call::On)
    }

    fn off(&self) -> Result<(), DeviceError> {
        self.record(Call::Off)
    }
}

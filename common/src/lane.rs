use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    device::{Actuator, Thermometer},
    error::{error_chain, DeviceError, Switch, ThermostatError},
    pid::{PidController, OUTPUT_MAX},
    types::{LaneEvent, LaneEventKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Chiller,
    Heater,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Chiller, Lane::Heater];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chiller => "chiller",
            Self::Heater => "heater",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one period is split between running and resting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub duty: Duration,
    pub wait: Duration,
    /// The computed duty was shorter than the minimum run time and was raised.
    pub forced_minimum: bool,
}

/// Converts a bounded controller output into the on and off portions of one
/// period. A zero duty rests for the whole period.
pub fn plan_cycle(output: f64, period: Duration, minimum: Duration) -> CyclePlan {
    let fraction = if output.is_finite() && output > 0.0 {
        output / OUTPUT_MAX
    } else {
        0.0
    };

    let mut duty = Duration::from_nanos((period.as_nanos() as f64 * fraction) as u64);
    let mut forced_minimum = false;

    if !duty.is_zero() && duty < minimum {
        duty = minimum;
        forced_minimum = true;
    }

    CyclePlan {
        duty,
        wait: period.saturating_sub(duty),
        forced_minimum,
    }
}

enum Wait {
    Elapsed,
    Cancelled,
}

/// One actuator's control loop for the lifetime of a single `on` call.
pub(crate) struct LaneRunner {
    pub(crate) lane: Lane,
    pub(crate) pid: PidController,
    pub(crate) thermometer: Arc<dyn Thermometer>,
    pub(crate) actuator: Arc<dyn Actuator>,
    pub(crate) period: Duration,
    pub(crate) minimum: Duration,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cancel: watch::Receiver<bool>,
    pub(crate) events: broadcast::Sender<LaneEvent>,
}

impl LaneRunner {
    /// Runs until cancelled (`Ok`) or until a device fails (`Err`).
    pub(crate) async fn run(mut self) -> Result<(), ThermostatError> {
        self.emit(LaneEventKind::Started {
            setpoint: self.pid.setpoint(),
        });

        let result = self.cycle().await;

        match &result {
            Ok(()) => self.emit(LaneEventKind::Cancelled),
            Err(err) => {
                let message = error_chain(err);
                warn!("actuator {} stopped: {message}", self.lane);
                self.emit(LaneEventKind::Failed { message });
            }
        }

        result
    }

    async fn cycle(&mut self) -> Result<(), ThermostatError> {
        let lane = self.lane;
        let mut last_update = self.clock.now();

        loop {
            let temperature = self.read()?;
            let elapsed = self.clock.since(last_update);
            let output = self.pid.update(temperature, elapsed);
            last_update = self.clock.now();

            let plan = plan_cycle(output, self.period, self.minimum);

            let (kp, ki, kd) = self.pid.gains();
            debug!(
                setpoint = self.pid.setpoint(),
                temperature,
                kp,
                ki,
                kd,
                ?elapsed,
                output,
                "actuator {lane} controller updated"
            );
            self.emit(LaneEventKind::Cycle {
                temperature,
                output,
                duty: plan.duty,
                wait: plan.wait,
                forced_minimum: plan.forced_minimum,
            });

            if !plan.duty.is_zero() {
                if plan.forced_minimum {
                    info!(
                        "forcing {lane} actuator to run for a minimum of {:?}",
                        plan.duty
                    );
                }

                self.actuator
                    .on()
                    .map_err(|source| ThermostatError::Actuator {
                        lane,
                        switch: Switch::On,
                        source,
                    })?;
                self.emit(LaneEventKind::Acting { duty: plan.duty });
                info!("actuator {lane} acting for {}", self.describe(plan.duty));

                if let Wait::Cancelled = self.wait(plan.duty).await {
                    return self.quit();
                }

                info!("actuator {lane} acted for {}", self.describe(plan.duty));
                self.actuator
                    .off()
                    .map_err(|source| ThermostatError::Actuator {
                        lane,
                        switch: Switch::OffAfterDuty,
                        source,
                    })?;
            }

            self.emit(LaneEventKind::Waiting { wait: plan.wait });
            info!("actuator {lane} waiting for {}", self.describe(plan.wait));

            if let Wait::Cancelled = self.wait(plan.wait).await {
                return self.quit();
            }

            info!("actuator {lane} waited for {}", self.describe(plan.wait));
        }
    }

    fn read(&self) -> Result<f64, ThermostatError> {
        let lane = self.lane;
        let temperature = self
            .thermometer
            .read()
            .map_err(|source| ThermostatError::Read { lane, source })?;

        if !temperature.is_finite() {
            return Err(ThermostatError::Read {
                lane,
                source: DeviceError::InvalidReading(temperature.to_string()),
            });
        }

        Ok(temperature)
    }

    async fn wait(&mut self, duration: Duration) -> Wait {
        let sleep = self.clock.sleep(duration);

        tokio::select! {
            biased;
            // A dropped sender means the owning run is gone; treat it as a stop.
            _ = self.cancel.wait_for(|cancelled| *cancelled) => Wait::Cancelled,
            _ = sleep => Wait::Elapsed,
        }
    }

    fn quit(&self) -> Result<(), ThermostatError> {
        info!("actuator {} quitting", self.lane);

        self.actuator
            .off()
            .map_err(|source| ThermostatError::Actuator {
                lane: self.lane,
                switch: Switch::OffOnQuit,
                source,
            })
    }

    fn describe(&self, duration: Duration) -> String {
        let factor = self.clock.factor();
        if factor == 1.0 {
            format!("{duration:?}")
        } else {
            format!(
                "{duration:?} ({:?} real at {factor}x)",
                self.clock.real_duration(duration)
            )
        }
    }

    fn emit(&self, kind: LaneEventKind) {
        // Nobody listening is fine.
        let _ = self.events.send(LaneEvent {
            lane: self.lane,
            at: Utc::now(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const PERIOD: Duration = Duration::from_millis(100);
    const MINIMUM: Duration = Duration::from_millis(10);

    fn plan(duty_ms: u64, wait_ms: u64, forced_minimum: bool) -> CyclePlan {
        CyclePlan {
            duty: Duration::from_millis(duty_ms),
            wait: Duration::from_millis(wait_ms),
            forced_minimum,
        }
    }

    #[test]
    fn output_maps_to_fraction_of_period() {
        let cases = [
            ("0% duty", 0.0, plan(0, 100, false)),
            ("minimum duty", 10.0, plan(10, 90, false)),
            ("50% duty", 50.0, plan(50, 50, false)),
            ("100% duty", 100.0, plan(100, 0, false)),
        ];

        for (name, output, expected) in cases {
            assert_eq!(plan_cycle(output, PERIOD, MINIMUM), expected, "{name}");
        }
    }

    #[test]
    fn short_duty_is_raised_to_minimum() {
        assert_eq!(plan_cycle(5.0, PERIOD, MINIMUM), plan(10, 90, true));
        assert_eq!(plan_cycle(0.001, PERIOD, MINIMUM), plan(10, 90, true));
    }

    #[test]
    fn unusable_output_rests_for_whole_period() {
        assert_eq!(plan_cycle(f64::NAN, PERIOD, MINIMUM), plan(0, 100, false));
        assert_eq!(plan_cycle(-3.0, PERIOD, MINIMUM), plan(0, 100, false));
    }

    #[test]
    fn minimum_longer_than_period_leaves_no_rest() {
        let plan = plan_cycle(1.0, PERIOD, Duration::from_millis(250));

        assert_eq!(plan.duty, Duration::from_millis(250));
        assert_eq!(plan.wait, Duration::ZERO);
    }

    #[test]
    fn lane_names() {
        assert_eq!(Lane::Chiller.to_string(), "chiller");
        assert_eq!(serde_json::to_string(&Lane::Heater).unwrap(), "\"heater\"");
    }
}

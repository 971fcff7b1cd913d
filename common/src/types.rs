use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lane::Lane;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaneState {
    #[default]
    Idle,
    Acting,
    Waiting,
    Cancelled,
    Error,
}

impl LaneState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LaneEventKind {
    Started {
        setpoint: f64,
    },
    /// Emitted once per iteration, after the controller output is planned.
    Cycle {
        temperature: f64,
        output: f64,
        duty: Duration,
        wait: Duration,
        forced_minimum: bool,
    },
    Acting {
        duty: Duration,
    },
    Waiting {
        wait: Duration,
    },
    Cancelled,
    Failed {
        message: String,
    },
}

/// Phase transition reported by a lane.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneEvent {
    pub lane: Lane,
    pub at: DateTime<Utc>,
    pub kind: LaneEventKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaneStatus {
    pub state: LaneState,
    #[serde(rename = "actuatorOn")]
    pub actuator_on: bool,
    pub temperature: Option<f64>,
    pub output: Option<f64>,
    #[serde(rename = "dutyMs")]
    pub duty_ms: u64,
    #[serde(rename = "waitMs")]
    pub wait_ms: u64,
    #[serde(rename = "forcedMinimum")]
    pub forced_minimum: bool,
    pub cycles: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThermostatStatus {
    pub on: bool,
    pub setpoint: Option<f64>,
    pub chiller: LaneStatus,
    pub heater: LaneStatus,
}

impl ThermostatStatus {
    pub fn lane(&self, lane: Lane) -> &LaneStatus {
        match lane {
            Lane::Chiller => &self.chiller,
            Lane::Heater => &self.heater,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut LaneStatus {
        match lane {
            Lane::Chiller => &mut self.chiller,
            Lane::Heater => &mut self.heater,
        }
    }
}

/// Folds lane events into a status snapshot for display.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    status: ThermostatStatus,
}

impl StatusTracker {
    pub fn status(&self) -> &ThermostatStatus {
        &self.status
    }

    pub fn apply(&mut self, event: &LaneEvent) {
        let lane = self.status.lane_mut(event.lane);
        lane.updated_at = Some(event.at);

        match &event.kind {
            LaneEventKind::Started { setpoint } => {
                *lane = LaneStatus {
                    updated_at: Some(event.at),
                    ..LaneStatus::default()
                };
                self.status.setpoint = Some(*setpoint);
            }
            LaneEventKind::Cycle {
                temperature,
                output,
                duty,
                wait,
                forced_minimum,
            } => {
                lane.temperature = Some(*temperature);
                lane.output = Some(*output);
                lane.duty_ms = as_millis(*duty);
                lane.wait_ms = as_millis(*wait);
                lane.forced_minimum = *forced_minimum;
                lane.cycles += 1;
            }
            LaneEventKind::Acting { .. } => {
                lane.state = LaneState::Acting;
                lane.actuator_on = true;
            }
            LaneEventKind::Waiting { .. } => {
                lane.state = LaneState::Waiting;
                lane.actuator_on = false;
            }
            LaneEventKind::Cancelled => {
                lane.state = LaneState::Cancelled;
                lane.actuator_on = false;
            }
            LaneEventKind::Failed { message } => {
                lane.state = LaneState::Error;
                lane.last_error = Some(message.clone());
            }
        }

        self.status.on =
            !(self.status.chiller.state.is_terminal() && self.status.heater.state.is_terminal());
    }
}

fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn event(lane: Lane, kind: LaneEventKind) -> LaneEvent {
        LaneEvent {
            lane,
            at: Utc::now(),
            kind,
        }
    }

    #[test]
    fn tracker_follows_lane_lifecycle() {
        let mut tracker = StatusTracker::default();
        assert!(!tracker.status().on);

        for lane in Lane::ALL {
            tracker.apply(&event(lane, LaneEventKind::Started { setpoint: 18.5 }));
        }
        tracker.apply(&event(
            Lane::Chiller,
            LaneEventKind::Cycle {
                temperature: 21.0,
                output: 25.0,
                duty: Duration::from_secs(450),
                wait: Duration::from_secs(1_350),
                forced_minimum: false,
            },
        ));
        tracker.apply(&event(
            Lane::Chiller,
            LaneEventKind::Acting {
                duty: Duration::from_secs(450),
            },
        ));

        let status = tracker.status();
        assert!(status.on);
        assert_eq!(status.setpoint, Some(18.5));
        assert_eq!(status.chiller.state, LaneState::Acting);
        assert!(status.chiller.actuator_on);
        assert_eq!(status.chiller.duty_ms, 450_000);
        assert_eq!(status.chiller.wait_ms, 1_350_000);
        assert_eq!(status.chiller.cycles, 1);
        assert_eq!(status.heater.state, LaneState::Idle);

        tracker.apply(&event(Lane::Chiller, LaneEventKind::Cancelled));
        assert!(tracker.status().on);

        tracker.apply(&event(
            Lane::Heater,
            LaneEventKind::Failed {
                message: "heater lane could not turn actuator on: relay stuck".to_string(),
            },
        ));

        let status = tracker.status();
        assert!(!status.on);
        assert!(!status.chiller.actuator_on);
        assert_eq!(status.heater.state, LaneState::Error);
        assert_eq!(
            status.heater.last_error.as_deref(),
            Some("heater lane could not turn actuator on: relay stuck")
        );
    }

    #[test]
    fn restart_resets_lane_counters() {
        let mut tracker = StatusTracker::default();
        tracker.apply(&event(Lane::Heater, LaneEventKind::Failed {
            message: "dead".to_string(),
        }));
        tracker.apply(&event(Lane::Heater, LaneEventKind::Started { setpoint: 20.0 }));

        let heater = tracker.status().lane(Lane::Heater);
        assert_eq!(heater.state, LaneState::Idle);
        assert_eq!(heater.last_error, None);
        assert_eq!(heater.cycles, 0);
    }

    #[test]
    fn status_serializes_with_screaming_states() {
        let value = serde_json::to_value(ThermostatStatus::default()).unwrap();

        assert_eq!(value["chiller"]["state"], "IDLE");
        assert_eq!(value["heater"]["actuatorOn"], false);
        assert_eq!(value["on"], false);
    }
}

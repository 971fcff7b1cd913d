use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chamber_common::{Actuator, Clock, DeviceError, Lane, Thermometer};
use serde::Serialize;
use tokio::time::Instant;

// Heat capacities in kJ per kelvin.
const BEER_CAPACITY: f64 = 4.2 * 1.0 * 20.0;
const AIR_CAPACITY: f64 = 1.005 * 1.225 * 0.200;
const WALL_CAPACITY: f64 = 5.0;
const HEATER_CAPACITY: f64 = 1.0;

// Power in kW.
const HEATER_POWER: f64 = 0.1;
const COOLER_POWER: f64 = 0.1;

const AIR_BEER_TRANSFER: f64 = 1.0 / 300.0;
const WALL_AIR_TRANSFER: f64 = 1.0 / 300.0;
const HEATER_AIR_TRANSFER: f64 = 1.0 / 30.0;
const ENVIRONMENT_WALL_TRANSFER: f64 = 0.001;

const AMBIENT: f64 = 20.0;

/// Lumped thermal model of a fermentation chamber: 20l of beer in 200l of air,
/// cooled through the walls and warmed by a small heater.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chamber {
    pub beer: f64,
    pub air: f64,
    pub wall: f64,
    pub heater: f64,
    pub environment: f64,
    #[serde(skip)]
    chiller_on: bool,
    #[serde(skip)]
    heater_on: bool,
}

impl Chamber {
    pub fn new(beer: f64) -> Self {
        Self {
            beer,
            air: AMBIENT,
            wall: AMBIENT,
            heater: AMBIENT,
            environment: AMBIENT,
            chiller_on: false,
            heater_on: false,
        }
    }

    pub fn set_actuator(&mut self, lane: Lane, on: bool) {
        match lane {
            Lane::Chiller => self.chiller_on = on,
            Lane::Heater => self.heater_on = on,
        }
    }

    pub fn actuator_on(&self, lane: Lane) -> bool {
        match lane {
            Lane::Chiller => self.chiller_on,
            Lane::Heater => self.heater_on,
        }
    }

    /// Advances the model by one second.
    pub fn step(&mut self) {
        let mut beer = self.beer;
        let mut air = self.air;
        let mut wall = self.wall;
        let mut heater = self.heater;

        if self.chiller_on {
            wall -= COOLER_POWER / WALL_CAPACITY;
        }
        if self.heater_on {
            heater += HEATER_POWER / HEATER_CAPACITY;
        }

        beer += (self.air - self.beer) * AIR_BEER_TRANSFER / BEER_CAPACITY;

        air += (self.heater - self.air) * HEATER_AIR_TRANSFER / AIR_CAPACITY;
        air += (self.wall - self.air) * WALL_AIR_TRANSFER / AIR_CAPACITY;
        air += (self.beer - self.air) * AIR_BEER_TRANSFER / AIR_CAPACITY;

        heater += (self.air - self.heater) * HEATER_AIR_TRANSFER / HEATER_CAPACITY;

        wall += (self.environment - self.wall) * ENVIRONMENT_WALL_TRANSFER / WALL_CAPACITY;
        wall += (self.air - self.wall) * WALL_AIR_TRANSFER / WALL_CAPACITY;

        self.beer = beer;
        self.air = air;
        self.wall = wall;
        self.heater = heater;
    }

    pub fn run_for(&mut self, seconds: u64) {
        for _ in 0..seconds {
            self.step();
        }
    }
}

struct Synced {
    chamber: Chamber,
    at: Instant,
}

/// A [`Chamber`] driven by clock time; devices bring the model up to date
/// before every read or switch.
pub struct SimulatedChamber {
    state: Mutex<Synced>,
    clock: Arc<dyn Clock>,
}

impl SimulatedChamber {
    pub fn new(chamber: Chamber, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Synced {
                chamber,
                at: clock.now(),
            }),
            clock,
        })
    }

    pub fn snapshot(&self) -> Chamber {
        self.sync().chamber.clone()
    }

    pub fn thermometer(self: &Arc<Self>) -> SimulatedThermometer {
        SimulatedThermometer {
            chamber: Arc::clone(self),
        }
    }

    pub fn actuator(self: &Arc<Self>, lane: Lane) -> SimulatedActuator {
        SimulatedActuator {
            chamber: Arc::clone(self),
            lane,
        }
    }

    fn sync(&self) -> MutexGuard<'_, Synced> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let seconds = self.clock.since(state.at).as_secs();
        state.chamber.run_for(seconds);
        state.at += Duration::from_secs(seconds);
        state
    }
}

pub struct SimulatedThermometer {
    chamber: Arc<SimulatedChamber>,
}

impl Thermometer for SimulatedThermometer {
    fn read(&self) -> Result<f64, DeviceError> {
        Ok(self.chamber.sync().chamber.beer)
    }
}

pub struct SimulatedActuator {
    chamber: Arc<SimulatedChamber>,
    lane: Lane,
}

impl SimulatedActuator {
    fn switch(&self, on: bool) -> Result<(), DeviceError> {
        self.chamber.sync().chamber.set_actuator(self.lane, on);
        Ok(())
    }
}

impl Actuator for SimulatedActuator {
    fn on(&self) -> Result<(), DeviceError> {
        self.switch(true)
    }

    fn off(&self) -> Result<(), DeviceError> {
        self.switch(false)
    }
}

#[cfg(test)]
mod tests {
    use chamber_common::DilatedClock;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn chamber_at_ambient_stays_put() {
        let mut chamber = Chamber::new(AMBIENT);
        chamber.run_for(3_600);

        assert_eq!(chamber, Chamber::new(AMBIENT));
    }

    #[test]
    fn actuators_move_beer_temperature() {
        let mut chilled = Chamber::new(AMBIENT);
        chilled.set_actuator(Lane::Chiller, true);
        chilled.run_for(6 * 3_600);

        let mut heated = Chamber::new(AMBIENT);
        heated.set_actuator(Lane::Heater, true);
        heated.run_for(6 * 3_600);

        assert!(chilled.wall < chilled.air, "{chilled:?}");
        assert!(chilled.beer < AMBIENT - 1.0, "{chilled:?}");
        assert!(heated.beer > AMBIENT + 1.0, "{heated:?}");
    }

    #[test]
    fn warm_beer_drifts_toward_ambient() {
        let mut chamber = Chamber::new(25.0);
        chamber.run_for(3_600);

        assert!(chamber.beer < 25.0);
        assert!(chamber.beer > AMBIENT);
    }

    #[tokio::test(start_paused = true)]
    async fn devices_follow_dilated_clock() {
        let clock = Arc::new(DilatedClock::new(3_600.0).unwrap());
        let chamber = SimulatedChamber::new(Chamber::new(AMBIENT), clock.clone());
        let thermometer = chamber.thermometer();
        let chiller = chamber.actuator(Lane::Chiller);

        chiller.on().unwrap();
        assert!(chamber.snapshot().actuator_on(Lane::Chiller));

        // One real second is an hour of chamber time.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let cooled = thermometer.read().unwrap();
        chiller.off().unwrap();

        let mut expected = Chamber::new(AMBIENT);
        expected.set_actuator(Lane::Chiller, true);
        expected.run_for(3_600);

        assert_eq!(cooled, expected.beer);
        assert!(!chamber.snapshot().actuator_on(Lane::Chiller));
    }
}

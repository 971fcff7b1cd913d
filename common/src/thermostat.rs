use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
    task::JoinSet,
};
use tracing::{debug, info, info_span, Instrument};

use crate::{
    clock::{Clock, SystemClock},
    config::ThermostatConfig,
    device::{Actuator, Devices, Thermometer},
    error::{ConfigError, ThermostatError},
    lane::{Lane, LaneRunner},
    pid::PidController,
    types::LaneEvent,
};

const EVENT_CAPACITY: usize = 64;

/// Cancellation handle of the run currently in progress, if any.
type ActiveSlot = Arc<Mutex<Option<watch::Sender<bool>>>>;

/// Dual-lane duty-cycle thermostat.
///
/// The chiller and heater each get their own PID controller and control loop.
/// The lanes share nothing but the thermometer and a cancellation signal; the
/// gain signs decide which of them acts for a given reading.
pub struct Thermostat {
    config: ThermostatConfig,
    thermometer: Arc<dyn Thermometer>,
    chiller: Arc<dyn Actuator>,
    heater: Arc<dyn Actuator>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<LaneEvent>,
    active: ActiveSlot,
}

impl Thermostat {
    pub fn new(mut config: ThermostatConfig, devices: Devices) -> Result<Self, ConfigError> {
        config.sanitize();
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            thermometer: devices.thermometer,
            chiller: devices.chiller,
            heater: devices.heater,
            clock: Arc::new(SystemClock),
            events,
            active: Arc::new(Mutex::new(None)),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn is_on(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Receives every lane event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LaneEvent> {
        self.events.subscribe()
    }

    /// Runs both lanes against `setpoint` until [`Thermostat::off`] is called or
    /// a device fails, returning the first failure.
    pub async fn on(&self, setpoint: f64) -> Result<(), ThermostatError> {
        self.start(setpoint)?.wait().await
    }

    /// Claims the thermostat and spawns both lanes without waiting for them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, setpoint: f64) -> Result<ActiveRun, ThermostatError> {
        if !setpoint.is_finite() {
            return Err(ThermostatError::InvalidSetpoint(setpoint));
        }

        let (cancel, cancelled) = watch::channel(false);
        {
            let mut active = lock(&self.active);
            if active.is_some() {
                return Err(ThermostatError::AlreadyOn);
            }
            *active = Some(cancel.clone());
        }

        let span = info_span!("thermostat", name = %self.config.name);
        span.in_scope(|| info!("thermostat on at {setpoint:.2}"));

        let mut tasks = JoinSet::new();
        for lane in Lane::ALL {
            let tuning = self.config.lane(lane);
            let mut pid = PidController::new(tuning.kp, tuning.ki, tuning.kd);
            pid.set_setpoint(setpoint);

            let runner = LaneRunner {
                lane,
                pid,
                thermometer: Arc::clone(&self.thermometer),
                actuator: Arc::clone(self.actuator(lane)),
                period: tuning.cycle_period(),
                minimum: tuning.minimum_run(),
                clock: Arc::clone(&self.clock),
                cancel: cancelled.clone(),
                events: self.events.clone(),
            };

            let lane_span = info_span!(parent: &span, "lane", lane = %lane);
            tasks.spawn(runner.run().instrument(lane_span));
        }

        Ok(ActiveRun {
            tasks,
            cancel,
            active: Arc::clone(&self.active),
            span,
        })
    }

    /// Signals both lanes to switch off and stop. Returns immediately; a no-op
    /// when the thermostat is not on.
    pub fn off(&self) {
        match lock(&self.active).as_ref() {
            Some(cancel) => {
                info!(name = %self.config.name, "thermostat off requested");
                cancel.send_replace(true);
            }
            None => debug!(name = %self.config.name, "thermostat already off"),
        }
    }

    fn actuator(&self, lane: Lane) -> &Arc<dyn Actuator> {
        match lane {
            Lane::Chiller => &self.chiller,
            Lane::Heater => &self.heater,
        }
    }
}

/// Both lanes of one `on` call.
///
/// Dropping it without [`ActiveRun::wait`] cancels the lanes and leaves them to
/// switch their actuators off in the background; the thermostat reports on and
/// rejects a new `on` until they have.
#[derive(Debug)]
pub struct ActiveRun {
    tasks: JoinSet<Result<(), ThermostatError>>,
    cancel: watch::Sender<bool>,
    active: ActiveSlot,
    span: tracing::Span,
}

impl ActiveRun {
    /// Waits for both lanes to exit. The first lane to fail cancels its sibling
    /// and its error is returned; later errors are only logged.
    pub async fn wait(mut self) -> Result<(), ThermostatError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.map_err(ThermostatError::from).and_then(|lane| lane);

            if let Err(err) = result {
                self.cancel.send_replace(true);
                match first_error {
                    None => first_error = Some(err),
                    Some(_) => self
                        .span
                        .in_scope(|| debug!("suppressed sibling lane error: {err}")),
                }
            }
        }

        self.span.in_scope(|| match &first_error {
            None => info!("thermostat off"),
            Some(err) => info!("thermostat stopped: {err}"),
        });

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Signals both lanes of this run to stop.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            lock(&self.active).take();
            return;
        }

        // The thermostat stays claimed until the lanes have switched off.
        self.cancel.send_replace(true);
        let mut tasks = std::mem::take(&mut self.tasks);
        let active = Arc::clone(&self.active);

        match Handle::try_current() {
            Ok(handle) => {
                let drain = async move {
                    while let Some(joined) = tasks.join_next().await {
                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => debug!("abandoned lane stopped: {err}"),
                            Err(err) => debug!("abandoned lane task failed: {err}"),
                        }
                    }
                    lock(&active).take();
                    debug!("abandoned run released");
                };
                handle.spawn(drain.instrument(self.span.clone()));
            }
            Err(_) => {
                tasks.detach_all();
                lock(&active).take();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

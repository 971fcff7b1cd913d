use std::{str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use chamber_common::{
    Clock, Devices, DilatedClock, Lane, LaneEvent, LaneEventKind, Thermostat, ThermostatConfig,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::chamber::{Chamber, SimulatedChamber};

#[derive(Debug, Clone, PartialEq)]
struct SimConfig {
    speed: f64,
    duration: Duration,
    setpoint: f64,
    start_temperature: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speed: 3_600.0,
            duration: Duration::from_secs(24 * 3_600),
            setpoint: 18.0,
            start_temperature: 22.0,
        }
    }
}

impl SimConfig {
    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let duration_secs = env_or("SIM_DURATION_SECS", defaults.duration.as_secs())?;

        Ok(Self {
            speed: env_or("SIM_SPEED", defaults.speed)?,
            duration: Duration::from_secs(duration_secs),
            setpoint: env_or("SIM_SETPOINT", defaults.setpoint)?,
            start_temperature: env_or("SIM_START_TEMP", defaults.start_temperature)?,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {name} value {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// One controller update as seen on the chamber clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct Sample {
    #[serde(rename = "elapsedSecs")]
    elapsed_secs: u64,
    lane: Lane,
    temperature: f64,
    output: f64,
    #[serde(rename = "dutySecs")]
    duty_secs: u64,
    #[serde(rename = "forcedMinimum")]
    forced_minimum: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    setpoint: f64,
    speed: f64,
    #[serde(rename = "durationSecs")]
    duration_secs: u64,
    #[serde(rename = "final")]
    final_state: Chamber,
    samples: Vec<Sample>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = SimConfig::from_env()?;
    info!(
        "simulating {:?} of chamber time at {}x, {:.2} -> {:.2}",
        config.duration, config.speed, config.start_temperature, config.setpoint
    );

    let report = simulate(&config, ThermostatConfig::default()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn simulate(
    config: &SimConfig,
    thermostat_config: ThermostatConfig,
) -> anyhow::Result<Report> {
    let clock = Arc::new(DilatedClock::new(config.speed)?);
    let chamber = SimulatedChamber::new(Chamber::new(config.start_temperature), clock.clone());
    let devices = Devices::new(
        Arc::new(chamber.thermometer()),
        Arc::new(chamber.actuator(Lane::Chiller)),
        Arc::new(chamber.actuator(Lane::Heater)),
    );

    let thermostat = Thermostat::new(thermostat_config, devices)?.with_clock(clock.clone());
    let mut events = thermostat.subscribe();
    let started = clock.now();
    let run = thermostat.start(config.setpoint)?.wait();
    tokio::pin!(run);

    let deadline = clock.sleep(config.duration);
    tokio::pin!(deadline);

    let mut samples = Vec::new();
    let outcome = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = &mut deadline => {
                info!("simulation time is up");
                thermostat.off();
                break (&mut run).await;
            }
            event = events.recv() => match event {
                Ok(event) => record(&mut samples, &event, clock.since(started)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("simulation skipped {skipped} lane events");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
        }
    };

    while let Ok(event) = events.try_recv() {
        record(&mut samples, &event, clock.since(started));
    }
    outcome.context("thermostat failed during simulation")?;

    let final_state = chamber.snapshot();
    info!(
        beer = final_state.beer,
        air = final_state.air,
        chiller_on = final_state.actuator_on(Lane::Chiller),
        heater_on = final_state.actuator_on(Lane::Heater),
        samples = samples.len(),
        "simulation finished"
    );

    Ok(Report {
        setpoint: config.setpoint,
        speed: config.speed,
        duration_secs: config.duration.as_secs(),
        final_state,
        samples,
    })
}

fn record(samples: &mut Vec<Sample>, event: &LaneEvent, elapsed: Duration) {
    if let LaneEventKind::Cycle {
        temperature,
        output,
        duty,
        forced_minimum,
        ..
    } = event.kind
    {
        samples.push(Sample {
            elapsed_secs: elapsed.as_secs(),
            lane: event.lane,
            temperature,
            output,
            duty_secs: duty.as_secs(),
            forced_minimum,
        });
    }
}

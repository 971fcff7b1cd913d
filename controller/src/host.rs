use std::{collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use chamber_common::{
    error_chain, DilatedClock, LaneEvent, RuntimeConfig, StatusTracker, Thermostat,
    ThermostatError, ThermostatStatus,
};

use crate::devices;

#[derive(Clone)]
struct AppState {
    thermostat: Arc<Thermostat>,
    tracker: Arc<Mutex<StatusTracker>>,
    run: Arc<Mutex<Option<JoinHandle<()>>>>,
    last_run: Arc<Mutex<RunRecord>>,
}

/// Outcome of the most recent run started over HTTP.
#[derive(Debug, Default)]
struct RunRecord {
    generation: u64,
    error: Option<String>,
}

impl RunRecord {
    fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.error = None;
        self.generation
    }

    /// Ignores results from runs that a newer `begin` has superseded.
    fn finish(&mut self, generation: u64, error: Option<String>) {
        if generation != self.generation {
            debug!("dropping result of superseded run {generation}");
            return;
        }
        self.error = error;
    }
}

#[derive(Clone)]
struct ConfigStore {
    path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    status: ThermostatStatus,
    #[serde(rename = "lastRunError")]
    last_run_error: Option<String>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::from_env();
    let mut runtime = store.load().await.unwrap_or_else(|err| {
        warn!(
            "failed to load runtime config from {}: {err:#}",
            store.path.display()
        );
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let devices = devices::open(&runtime.devices).context("failed to open chamber devices")?;
    let mut thermostat = Thermostat::new(runtime.thermostat.clone(), devices)?;
    if let Some(multiplier) = runtime.clock_multiplier {
        let clock = DilatedClock::new(multiplier)?;
        warn!("lanes run on a dilated clock at {multiplier}x");
        thermostat = thermostat.with_clock(Arc::new(clock));
    }

    let app_state = AppState::new(Arc::new(thermostat));
    let app = router(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state))
        .await?;
    Ok(())
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/on", post(handle_on))
        .route("/api/off", post(handle_off))
        .with_state(app_state)
}

impl AppState {
    /// Must be created inside a runtime; spawns the status loop.
    fn new(thermostat: Arc<Thermostat>) -> Self {
        let events = thermostat.subscribe();
        let app_state = Self {
            thermostat,
            tracker: Arc::new(Mutex::new(StatusTracker::default())),
            run: Arc::new(Mutex::new(None)),
            last_run: Arc::new(Mutex::new(RunRecord::default())),
        };

        spawn_status_loop(app_state.tracker.clone(), events);
        app_state
    }

    async fn status_view(&self) -> StatusView {
        let mut status = self.tracker.lock().await.status().clone();
        // Lane events lag the slot; the slot decides whether a run is live.
        status.on = self.thermostat.is_on();

        StatusView {
            status,
            last_run_error: self.last_run.lock().await.error.clone(),
        }
    }
}

fn spawn_status_loop(
    tracker: Arc<Mutex<StatusTracker>>,
    mut events: broadcast::Receiver<LaneEvent>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracker.lock().await.apply(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("status loop skipped {skipped} lane events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal(app_state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
    }

    info!("shutting down, turning thermostat off");
    app_state.thermostat.off();

    let run = app_state.run.lock().await.take();
    if let Some(run) = run {
        if let Err(err) = run.await {
            warn!("thermostat run did not finish cleanly: {err}");
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status_view().await)
}

async fn handle_on(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("setpoint") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'setpoint' parameter");
    };
    let Ok(setpoint) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid setpoint value");
    };

    let active = match state.thermostat.start(setpoint) {
        Ok(active) => active,
        Err(ThermostatError::AlreadyOn) => {
            return error_response(StatusCode::CONFLICT, "Thermostat is already on");
        }
        Err(err @ ThermostatError::InvalidSetpoint(_)) => {
            return error_response(StatusCode::BAD_REQUEST, &err.to_string());
        }
        Err(err) => {
            warn!("failed to start thermostat: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to start thermostat");
        }
    };

    let generation = state.last_run.lock().await.begin();

    let last_run = state.last_run.clone();
    let handle = tokio::spawn(async move {
        let error = match active.wait().await {
            Ok(()) => {
                debug!("thermostat run {generation} finished");
                None
            }
            Err(err) => {
                let message = error_chain(&err);
                warn!("thermostat run {generation} failed: {message}");
                Some(message)
            }
        };
        last_run.lock().await.finish(generation, error);
    });
    *state.run.lock().await = Some(handle);

    (StatusCode::ACCEPTED, Json(state.status_view().await)).into_response()
}

async fn handle_off(State(state): State<AppState>) -> impl IntoResponse {
    state.thermostat.off();
    (StatusCode::ACCEPTED, Json(state.status_view().await))
}

impl ConfigStore {
    fn from_env() -> Self {
        let path = std::env::var("CHAMBER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("chamber.json"));

        Self::new(path)
    }

    fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
        }
    }

    async fn load(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

//! Host-side simulator: same configuration surface and control flow as the
//! device build, with the radio, sensors and relay replaced by simulated
//! stand-ins. Useful for exercising the provisioning flow and the control
//! loop without hardware.

use std::{
    collections::{HashMap, VecDeque},
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
};
use tracing::{info, warn};

use soilctl_common::{
    load_config, save_config, ControlEngine, DeviceConfig, ErrorBody, KvStore, ModeEffect,
    ModeMachine, NetworkEvent, NetworkJoinError, NetworkState, PersistError, RequestError,
    SaveAck, ScanResults, SensorSample,
};

use crate::pages;

const MAX_FORM_BODY: usize = 2048;

#[derive(Clone)]
struct AppState {
    config: Arc<Mutex<DeviceConfig>>,
    engine: Arc<Mutex<ControlEngine>>,
    machine: Arc<Mutex<ModeMachine>>,
    store: Arc<Mutex<FileKv>>,
    transition: mpsc::Sender<()>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("SOILCTL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.soilctl"));
    let mut store = FileKv::open(data_dir.join("kv.json"));

    let cfg = load_config(&mut store);
    info!(
        "config loaded: dev_id=`{}`, cycle={}ms, soil {}..{}, auto={}",
        cfg.device_id, cfg.sample_period_ms, cfg.soil_min, cfg.soil_max, cfg.auto_enabled
    );

    let engine = ControlEngine::new(&cfg);
    let (transition_tx, transition_rx) = mpsc::channel(1);

    let state = AppState {
        config: Arc::new(Mutex::new(cfg)),
        engine: Arc::new(Mutex::new(engine)),
        machine: Arc::new(Mutex::new(ModeMachine::new())),
        store: Arc::new(Mutex::new(store)),
        transition: transition_tx,
    };

    spawn_transition_task(state.clone(), transition_rx);

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/config", post(handle_config_submit))
        .route("/save-settings", post(handle_save_settings))
        .route("/data", get(handle_data))
        .route("/scan", get(handle_scan))
        // Stand-in for the physical override button; simulator only.
        .route("/toggle", post(handle_toggle))
        .with_state(state);

    let port = std::env::var("SOILCTL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind configuration server at {addr}"))?;

    info!("provisioning surface listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// One-shot provisioning→client transition per process, matching the
/// device lifecycle. Interprets the state machine's effects against the
/// simulated radio.
fn spawn_transition_task(state: AppState, mut rx: mpsc::Receiver<()>) {
    tokio::spawn(async move {
        if rx.recv().await.is_none() {
            return;
        }

        // Let the acknowledgment response flush before teardown.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let mut pending: VecDeque<ModeEffect> = {
            let mut machine = state.machine.lock().await;
            machine.on_event(NetworkEvent::CredentialsCommitted).into()
        };

        while let Some(effect) = pending.pop_front() {
            match effect {
                ModeEffect::StopProvisioning => {
                    info!("[sim] provisioning AP and surface stopped");
                }
                ModeEffect::StartJoin | ModeEffect::RetryJoin => {
                    if effect == ModeEffect::RetryJoin {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        let attempts = state.machine.lock().await.join_attempts();
                        info!("[sim] retrying join (attempt {})", attempts + 1);
                    }

                    let ssid = state.config.lock().await.network_ssid.clone();
                    let event = simulated_join(&ssid).await;
                    let effects = state.machine.lock().await.on_event(event);
                    pending.extend(effects);
                }
                ModeEffect::StartRuntime => {
                    let period_ms = state.config.lock().await.sample_period_ms;
                    info!("[sim] address assigned; starting control loop at {period_ms}ms");
                    spawn_sensor_loop(state.clone(), period_ms);
                }
                ModeEffect::ScheduleRestart { delay_ms } => {
                    warn!(
                        "[sim] join failed for good; device would restart in {}s",
                        delay_ms / 1000
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    std::process::exit(1);
                }
            }
        }
    });
}

/// Join outcome is steered by `SOILCTL_SIM_JOIN`: unset/`ok` succeeds,
/// `fail` reports disconnects, `timeout` reports bounded-wait expiry.
async fn simulated_join(ssid: &str) -> NetworkEvent {
    tokio::time::sleep(Duration::from_millis(400)).await;

    match std::env::var("SOILCTL_SIM_JOIN").as_deref() {
        Ok("fail") => {
            let err = NetworkJoinError::Association {
                ssid: ssid.to_string(),
                reason: "simulated disconnect".into(),
            };
            warn!("[sim] {err}");
            NetworkEvent::Disconnected
        }
        Ok("timeout") => {
            warn!("[sim] {}", NetworkJoinError::AddressTimeout);
            NetworkEvent::JoinTimedOut
        }
        _ => {
            info!("[sim] associated with `{ssid}`, address assigned");
            NetworkEvent::GotAddress
        }
    }
}

fn spawn_sensor_loop(state: AppState, period_ms: u32) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(u64::from(period_ms)));
        let mut tick: u64 = 0;

        loop {
            interval.tick().await;
            tick = tick.saturating_add(1);

            let sample = simulated_sample(tick);
            let action = state.engine.lock().await.observe(sample);
            if let Some(action) = action {
                info!("[sim] relay {action:?} (auto, soil {}%)", sample.soil_percent);
            }
        }
    });
}

/// The ESP32 build reads a DHT11 and the soil ADC here. The simulator
/// sweeps the soil range so threshold crossings actually happen during a
/// session, with mild climate drift on top.
fn simulated_sample(tick: u64) -> SensorSample {
    let phase = (tick % 40) as i32;
    let soil = if phase < 20 {
        80 - phase * 3
    } else {
        20 + (phase - 20) * 3
    };

    SensorSample {
        temperature: 21.0 + (tick % 10) as f32 * 0.3,
        humidity: 48.0 + (tick % 7) as f32 * 1.5,
        soil_percent: soil.clamp(0, 100) as u8,
    }
}

async fn handle_index(State(state): State<AppState>) -> Html<String> {
    let cfg = state.config.lock().await;
    Html(pages::render_config_page(&cfg))
}

async fn handle_config_submit(
    State(state): State<AppState>,
    body: String,
) -> axum::response::Response {
    if body.len() > MAX_FORM_BODY {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &RequestError::BodyTooLarge.to_string(),
        );
    }
    if body.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &RequestError::EmptyBody.to_string(),
        );
    }

    let mut submitted = state.config.lock().await.clone();
    submitted.apply_submission(&body);
    if !submitted.has_credentials() {
        return error_response(StatusCode::BAD_REQUEST, "WiFi SSID must not be empty");
    }

    let already_connected = state.machine.lock().await.state() == NetworkState::Connected;
    persist_config(&state, submitted.clone()).await;

    if already_connected {
        // Re-provisioning a connected controller reboots it back into
        // setup mode; the simulator exits and relies on its supervisor.
        warn!("[sim] credentials replaced while connected; restarting in 3s");
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            std::process::exit(0);
        });
    } else {
        // One-shot trigger; repeat submissions while a transition is
        // already running are ignored rather than queued.
        let _ = state.transition.try_send(());
    }

    Html(pages::render_transition_page(&submitted.network_ssid)).into_response()
}

async fn handle_save_settings(
    State(state): State<AppState>,
    body: String,
) -> axum::response::Response {
    if state.machine.lock().await.state() != NetworkState::Connected {
        return error_response(StatusCode::CONFLICT, "controller is still provisioning");
    }

    let mut updated = state.config.lock().await.clone();
    if let Err(err) = updated.apply_partial_update(&body) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    persist_config(&state, updated).await;
    Json(SaveAck::success()).into_response()
}

async fn handle_data(State(state): State<AppState>) -> axum::response::Response {
    if state.machine.lock().await.state() != NetworkState::Connected {
        return error_response(StatusCode::CONFLICT, "controller is still provisioning");
    }

    let telemetry = state.engine.lock().await.telemetry();
    Json(telemetry).into_response()
}

/// Candidates come from `SOILCTL_SIM_SSIDS` (comma-separated); an empty
/// neighborhood yields `{"wifi":[]}` rather than an error.
async fn handle_scan() -> Json<ScanResults> {
    let raw = std::env::var("SOILCTL_SIM_SSIDS")
        .unwrap_or_else(|_| "greenhouse,workshop".to_string());
    let ssids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|ssid| !ssid.is_empty())
        .map(str::to_string)
        .collect();

    Json(ScanResults::from_ssids(ssids))
}

async fn handle_toggle(State(state): State<AppState>) -> axum::response::Response {
    if state.machine.lock().await.state() != NetworkState::Connected {
        return error_response(StatusCode::CONFLICT, "controller is still provisioning");
    }

    let action = state.engine.lock().await.manual_toggle();
    info!("[sim] relay {action:?} (manual override)");
    Json(SaveAck::success()).into_response()
}

/// Counterpart of the device's `persist_config`: engine parameters update
/// immediately, a failed commit is logged and tolerated, and the shared
/// snapshot stays authoritative.
async fn persist_config(state: &AppState, cfg: DeviceConfig) {
    {
        let mut engine = state.engine.lock().await;
        engine.set_thresholds(cfg.soil_min, cfg.soil_max);
        engine.set_auto_enabled(cfg.auto_enabled);
    }

    let result: Result<(), PersistError> = {
        let mut store = state.store.lock().await;
        save_config(&mut *store, &cfg)
    };
    if let Err(err) = result {
        warn!("{err}");
    }

    *state.config.lock().await = cfg;
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

/// File-backed store with NVS-like semantics: sets land in a staging area
/// and only become durable after a successful commit, which replaces the
/// file atomically via a temp-file rename.
struct FileKv {
    path: PathBuf,
    committed: HashMap<String, String>,
    staged: HashMap<String, String>,
}

impl FileKv {
    fn open(path: PathBuf) -> Self {
        let committed = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!("ignoring corrupt store at {}: {err}", path.display());
                HashMap::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!("failed to read store at {}: {err}", path.display());
                HashMap::new()
            }
        };

        Self {
            path,
            committed,
            staged: HashMap::new(),
        }
    }

    fn read(&self, key: &str) -> Option<&String> {
        self.committed.get(key)
    }

    fn stage(&mut self, key: &str, value: String) -> Result<(), PersistError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }
}

impl KvStore for FileKv {
    fn get_str(&mut self, key: &str) -> Option<String> {
        self.read(key).cloned()
    }

    fn get_u32(&mut self, key: &str) -> Option<u32> {
        self.read(key)?.parse().ok()
    }

    fn get_i32(&mut self, key: &str) -> Option<i32> {
        self.read(key)?.parse().ok()
    }

    fn get_bool(&mut self, key: &str) -> Option<bool> {
        self.read(key)?.parse().ok()
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), PersistError> {
        self.stage(key, value.to_string())
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError> {
        self.stage(key, value.to_string())
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), PersistError> {
        self.stage(key, value.to_string())
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), PersistError> {
        self.stage(key, value.to_string())
    }

    fn commit(&mut self) -> Result<(), PersistError> {
        let mut next = self.committed.clone();
        next.extend(self.staged.drain());

        let payload =
            serde_json::to_vec_pretty(&next).map_err(|err| PersistError(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PersistError(err.to_string()))?;
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, payload).map_err(|err| PersistError(err.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|err| PersistError(err.to_string()))?;

        self.committed = next;
        Ok(())
    }
}

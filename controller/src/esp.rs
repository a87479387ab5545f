use std::{
    collections::VecDeque,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::dht11;
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_12,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::Ets,
    gpio::{AnyIOPin, Gpio18, Gpio19, Gpio32, IOPin, Input, InputOutput, Output, PinDriver, Pull},
    peripherals::Peripherals,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use soilctl_common::{
    config::KV_NAMESPACE,
    control::{CLIMATE_READ_ATTEMPTS, CLIMATE_RETRY_DELAY_MS, OVERRIDE_DEBOUNCE_MS, OVERRIDE_POLL_MS},
    load_config,
    netmode::MAX_JOIN_ATTEMPTS,
    save_config, soil_percent_from_raw, ControlEngine, DeviceConfig, ErrorBody, KvStore,
    ModeEffect, ModeMachine, NetworkEvent, NetworkJoinError, NetworkState, PersistError,
    RelayAction, RequestError, SaveAck, ScanResults, SensorError, SensorSample,
};

use crate::pages;

const PROVISIONING_AP_SSID: &str = "SoilCtl-Setup";
const PROVISIONING_AP_PASSWORD: &str = "soilctl-setup";
const PROVISIONING_AP_CHANNEL: u8 = 1;
const PROVISIONING_AP_MAX_CLIENTS: u16 = 4;

const MAX_HTTP_BODY: usize = 2048;
const HTTP_STACK_SIZE: usize = 8 * 1024;

/// Bounded waits for the two phases of a join attempt. A hung join
/// surfaces as `NetworkJoinError::AddressTimeout` and counts toward the
/// retry cap instead of blocking the transition task forever.
const ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(10);
const ADDRESS_TIMEOUT: Duration = Duration::from_secs(15);
const JOIN_RETRY_DELAY_MS: u64 = 3_000;

const SCAN_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const REPROVISION_RESTART_DELAY_MS: u64 = 3_000;
const STATION_HEALTH_POLL_SECS: u64 = 5;
const STATION_RESTART_GRACE: Duration = Duration::from_secs(300);

/// Commands routed to the task owning the wifi driver. All radio access is
/// serialized through this channel.
enum WifiCommand {
    Scan(mpsc::Sender<Result<ScanResults, String>>),
    /// Credentials were validated, persisted and acknowledged; begin the
    /// mode transition.
    Apply,
}

#[derive(Clone)]
struct SharedState {
    config: Arc<Mutex<DeviceConfig>>,
    engine: Arc<Mutex<ControlEngine>>,
    kv: Arc<Mutex<NvsKv>>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut kv = NvsKv::open(nvs_partition.clone())?;
    let cfg = load_config(&mut kv);
    info!(
        "config loaded: dev_id=`{}`, cycle={}ms, soil {}..{}, auto={}",
        cfg.device_id, cfg.sample_period_ms, cfg.soil_min, cfg.soil_max, cfg.auto_enabled
    );

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let relay = Arc::new(Mutex::new(Relay::new(pins.gpio18)?));
    let climate = ClimateSensor::new(pins.gpio4.downgrade())?;
    let soil = SoilProbe::new(peripherals.adc1, pins.gpio32)?;

    let mut button = PinDriver::input(pins.gpio19)?;
    button.set_pull(Pull::Up)?;

    let engine = ControlEngine::new(&cfg);
    let state = SharedState {
        config: Arc::new(Mutex::new(cfg)),
        engine: Arc::new(Mutex::new(engine)),
        kv: Arc::new(Mutex::new(kv)),
    };

    let mut esp_wifi = EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    // Boot always enters provisioning, even with stored credentials; the
    // operator submits the form to move the device into client mode.
    let mut machine = ModeMachine::new();
    start_provisioning_ap(&mut wifi)?;

    let (wifi_tx, wifi_rx) = mpsc::channel::<WifiCommand>();
    let provisioning_server = create_provisioning_server(state.clone(), wifi_tx)?;
    info!(
        "provisioning surface ready at http://192.168.4.1 (AP `{}`)",
        PROVISIONING_AP_SSID
    );

    // Radio-owner loop: serve scan requests until a validated submission
    // arrives.
    loop {
        match wifi_rx
            .recv()
            .context("provisioning command channel closed")?
        {
            WifiCommand::Scan(reply) => {
                let _ = reply.send(scan_networks(&mut wifi));
            }
            WifiCommand::Apply => break,
        }
    }

    // The acknowledgment response is already on the wire; give the client a
    // short grace before the AP disappears underneath it.
    thread::sleep(Duration::from_millis(100));

    drive_transition(&mut machine, &mut wifi, &state, provisioning_server)?;

    let runtime_server = create_runtime_server(state.clone())?;
    let period_ms = state.config.lock().unwrap().sample_period_ms;
    spawn_control_loop(state.clone(), climate, soil, relay.clone(), period_ms)?;
    spawn_override_input(state, button, relay)?;

    let _server = runtime_server;
    watch_station_health(&mut wifi)
}

/// Interprets the state machine's effects until the device is either
/// `Connected` (returns) or `Failed` (restarts).
fn drive_transition(
    machine: &mut ModeMachine,
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    state: &SharedState,
    provisioning_server: EspHttpServer<'static>,
) -> anyhow::Result<()> {
    let cfg = state.config.lock().unwrap().clone();
    let mut provisioning_server = Some(provisioning_server);

    let mut pending: VecDeque<ModeEffect> =
        machine.on_event(NetworkEvent::CredentialsCommitted).into();

    while let Some(effect) = pending.pop_front() {
        match effect {
            ModeEffect::StopProvisioning => {
                info!("stopping provisioning surface and AP");
                drop(provisioning_server.take());
                wifi.stop().context("failed to stop provisioning wifi")?;
            }
            ModeEffect::StartJoin => {
                configure_station(wifi, &cfg)?;
                let event = attempt_join(wifi, &cfg.network_ssid);
                pending.extend(machine.on_event(event));
            }
            ModeEffect::RetryJoin => {
                let _ = wifi.wifi_mut().disconnect();
                thread::sleep(Duration::from_millis(JOIN_RETRY_DELAY_MS));
                info!(
                    "retrying join (attempt {}/{})",
                    machine.join_attempts() + 1,
                    MAX_JOIN_ATTEMPTS
                );
                let event = attempt_join(wifi, &cfg.network_ssid);
                pending.extend(machine.on_event(event));
            }
            ModeEffect::StartRuntime => {
                let ip = wifi.wifi().sta_netif().get_ip_info()?.ip;
                info!("joined `{}`; station address {}", cfg.network_ssid, ip);
            }
            ModeEffect::ScheduleRestart { delay_ms } => {
                warn!(
                    "{}; restarting in {}s",
                    NetworkJoinError::RetriesExhausted(machine.join_attempts()),
                    delay_ms / 1000
                );
                thread::sleep(Duration::from_millis(delay_ms));
                unsafe { esp_idf_svc::sys::esp_restart() };
            }
        }
    }

    if machine.state() == NetworkState::Connected {
        Ok(())
    } else {
        Err(anyhow!(
            "mode transition ended in state {}",
            machine.state().as_str()
        ))
    }
}

fn attempt_join(wifi: &mut BlockingWifi<&mut EspWifi<'static>>, ssid: &str) -> NetworkEvent {
    match join_station(wifi, ssid) {
        Ok(()) => NetworkEvent::GotAddress,
        Err(err @ NetworkJoinError::AddressTimeout) => {
            warn!("{err}");
            NetworkEvent::JoinTimedOut
        }
        Err(err) => {
            warn!("{err}");
            NetworkEvent::Disconnected
        }
    }
}

fn join_station(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    ssid: &str,
) -> Result<(), NetworkJoinError> {
    let association_failed = |reason: String| NetworkJoinError::Association {
        ssid: ssid.to_string(),
        reason,
    };

    wifi.wifi_mut()
        .connect()
        .map_err(|err| association_failed(err.to_string()))?;

    wifi.wifi_wait_while(
        || wifi.wifi().is_connected().map(|connected| !connected),
        Some(ASSOCIATION_TIMEOUT),
    )
    .map_err(|err| association_failed(err.to_string()))?;

    wifi.ip_wait_while(
        || wifi.wifi().is_up().map(|up| !up),
        Some(ADDRESS_TIMEOUT),
    )
    .map_err(|_| NetworkJoinError::AddressTimeout)?;

    Ok(())
}

fn start_provisioning_ap(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> anyhow::Result<()> {
    // Mixed AP+STA so the on-demand scan works while the setup AP is up.
    wifi.set_configuration(&Configuration::Mixed(
        ClientConfiguration::default(),
        AccessPointConfiguration {
            ssid: PROVISIONING_AP_SSID
                .try_into()
                .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
            password: PROVISIONING_AP_PASSWORD
                .try_into()
                .map_err(|_| anyhow!("provisioning AP password too long"))?,
            auth_method: AuthMethod::WPA2Personal,
            channel: PROVISIONING_AP_CHANNEL,
            max_connections: PROVISIONING_AP_MAX_CLIENTS,
            ..Default::default()
        },
    ))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!(
        "provisioning AP started on `{}` (password: `{}`)",
        PROVISIONING_AP_SSID, PROVISIONING_AP_PASSWORD
    );
    Ok(())
}

fn configure_station(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    cfg: &DeviceConfig,
) -> anyhow::Result<()> {
    let auth_method = if cfg.network_password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: cfg
            .network_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: cfg
            .network_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("station started, joining `{}`", cfg.network_ssid);
    Ok(())
}

fn scan_networks(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
) -> Result<ScanResults, String> {
    match wifi.wifi_mut().scan() {
        Ok(points) => Ok(ScanResults::from_ssids(
            points.iter().map(|point| point.ssid.as_str()),
        )),
        Err(err) => Err(err.to_string()),
    }
}

fn create_provisioning_server(
    state: SharedState,
    wifi_tx: mpsc::Sender<WifiCommand>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: HTTP_STACK_SIZE,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    register_config_page(&mut server, &state)?;

    {
        let wifi_tx = wifi_tx.clone();
        server.fn_handler::<anyhow::Error, _>("/scan", Method::Get, move |req| {
            let (reply_tx, reply_rx) = mpsc::channel();
            if wifi_tx.send(WifiCommand::Scan(reply_tx)).is_err() {
                return write_error_json(req, 500, "Failed to scan WiFi");
            }

            match reply_rx.recv_timeout(SCAN_REPLY_TIMEOUT) {
                Ok(Ok(results)) => write_json(req, &results),
                Ok(Err(reason)) => {
                    warn!("wifi scan failed: {reason}");
                    write_error_json(req, 200, "Failed to scan WiFi")
                }
                Err(_) => write_error_json(req, 200, "Failed to scan WiFi"),
            }
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/config", Method::Post, move |mut req| {
            let body = match read_form_body(&mut req) {
                Ok(body) => body,
                Err(err) => return write_error_json(req, 400, &err.to_string()),
            };

            let mut submitted = state.config.lock().unwrap().clone();
            submitted.apply_submission(&body);
            if !submitted.has_credentials() {
                return write_error_json(req, 400, "WiFi SSID must not be empty");
            }

            persist_config(&state, submitted.clone());

            let page = pages::render_transition_page(&submitted.network_ssid);
            req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "text/html; charset=utf-8")],
            )?
            .write_all(page.as_bytes())?;

            // Teardown starts only after the acknowledgment is written.
            let _ = wifi_tx.send(WifiCommand::Apply);
            Ok(())
        })?;
    }

    Ok(server)
}

fn create_runtime_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: HTTP_STACK_SIZE,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    register_config_page(&mut server, &state)?;

    {
        let state = state.clone();
        server.fn_handler("/data", Method::Get, move |req| {
            let telemetry = state.engine.lock().unwrap().telemetry();
            write_json(req, &telemetry)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/save-settings", Method::Post, move |mut req| {
            let body = match read_form_body(&mut req) {
                Ok(body) => body,
                Err(err) => return write_error_json(req, 400, &err.to_string()),
            };

            let mut updated = state.config.lock().unwrap().clone();
            if let Err(err) = updated.apply_partial_update(&body) {
                return write_error_json(req, 400, &err.to_string());
            }

            persist_config(&state, updated);
            write_json(req, &SaveAck::success())
        })?;
    }

    // Submitting new credentials on a connected controller persists them
    // and reboots back into provisioning mode.
    server.fn_handler::<anyhow::Error, _>("/config", Method::Post, move |mut req| {
        let body = match read_form_body(&mut req) {
            Ok(body) => body,
            Err(err) => return write_error_json(req, 400, &err.to_string()),
        };

        let mut submitted = state.config.lock().unwrap().clone();
        submitted.apply_submission(&body);
        if !submitted.has_credentials() {
            return write_error_json(req, 400, "WiFi SSID must not be empty");
        }

        persist_config(&state, submitted.clone());

        let page = pages::render_transition_page(&submitted.network_ssid);
        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "text/html; charset=utf-8")],
        )?
        .write_all(page.as_bytes())?;

        thread::Builder::new()
            .name("reconfig-restart".into())
            .spawn(|| {
                thread::sleep(Duration::from_millis(REPROVISION_RESTART_DELAY_MS));
                unsafe { esp_idf_svc::sys::esp_restart() };
            })
            .context("failed to spawn restart thread")?;
        Ok(())
    })?;

    Ok(server)
}

fn register_config_page(server: &mut EspHttpServer<'static>, state: &SharedState) -> anyhow::Result<()> {
    let state = state.clone();
    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        let page = pages::render_config_page(&state.config.lock().unwrap());
        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "text/html; charset=utf-8")],
        )?
        .write_all(page.as_bytes())?;
        Ok(())
    })?;
    Ok(())
}

/// Pushes a validated config into the engine, the store and the shared
/// snapshot. A failed commit is logged and tolerated: the in-memory values
/// stay authoritative and the next save retries.
fn persist_config(state: &SharedState, cfg: DeviceConfig) {
    {
        let mut engine = state.engine.lock().unwrap();
        engine.set_thresholds(cfg.soil_min, cfg.soil_max);
        engine.set_auto_enabled(cfg.auto_enabled);
    }

    let result: Result<(), PersistError> = {
        let mut kv = state.kv.lock().unwrap();
        save_config(&mut *kv, &cfg)
    };
    if let Err(err) = result {
        warn!("{err}");
    }

    *state.config.lock().unwrap() = cfg;
}

fn spawn_control_loop(
    state: SharedState,
    mut climate: ClimateSensor,
    mut soil: SoilProbe,
    relay: Arc<Mutex<Relay>>,
    period_ms: u32,
) -> anyhow::Result<()> {
    // The period is captured once; a changed setting applies after restart.
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            let sample = read_cycle(&mut climate, &mut soil);
            info!(
                "sample: {:.1}C {:.1}%rh soil {}%",
                sample.temperature, sample.humidity, sample.soil_percent
            );

            let action = state.engine.lock().unwrap().observe(sample);
            if let Some(action) = action {
                info!("relay {action:?} (auto, soil {}%)", sample.soil_percent);
                relay.lock().unwrap().apply(action);
            }

            thread::sleep(Duration::from_millis(u64::from(period_ms)));
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn read_cycle(climate: &mut ClimateSensor, soil: &mut SoilProbe) -> SensorSample {
    let (temperature, humidity) = read_climate_with_retry(climate);

    let soil_percent = match soil.read_raw() {
        Ok(raw) => soil_percent_from_raw(raw),
        Err(err) => {
            warn!("{err}");
            0
        }
    };

    SensorSample {
        temperature,
        humidity,
        soil_percent,
    }
}

/// Transient climate failures degrade to a zero reading after the retry
/// budget; the device keeps running regardless.
fn read_climate_with_retry(climate: &mut ClimateSensor) -> (f32, f32) {
    for attempt in 1..=CLIMATE_READ_ATTEMPTS {
        match climate.read() {
            Ok(values) => return values,
            Err(err) => {
                warn!("climate read attempt {attempt}/{CLIMATE_READ_ATTEMPTS} failed: {err}");
                if attempt < CLIMATE_READ_ATTEMPTS {
                    thread::sleep(Duration::from_millis(CLIMATE_RETRY_DELAY_MS));
                }
            }
        }
    }

    (0.0, 0.0)
}

fn spawn_override_input(
    state: SharedState,
    button: PinDriver<'static, Gpio19, Input>,
    relay: Arc<Mutex<Relay>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("override-input".into())
        .stack_size(4 * 1024)
        .spawn(move || {
            let mut last_pressed = false;
            loop {
                let pressed = button.is_low();
                if pressed && !last_pressed {
                    // Debounce: the line must still be asserted after the
                    // settle window.
                    thread::sleep(Duration::from_millis(OVERRIDE_DEBOUNCE_MS));
                    if button.is_low() {
                        let action = state.engine.lock().unwrap().manual_toggle();
                        info!("relay {action:?} (manual override)");
                        relay.lock().unwrap().apply(action);
                    }
                }
                last_pressed = pressed;
                thread::sleep(Duration::from_millis(OVERRIDE_POLL_MS));
            }
        })
        .context("failed to spawn override input thread")?;
    Ok(())
}

/// Post-connect health watchdog: a sustained station outage past the grace
/// period restarts the device for recovery.
fn watch_station_health(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> anyhow::Result<()> {
    let mut down_since: Option<Instant> = None;

    loop {
        thread::sleep(Duration::from_secs(STATION_HEALTH_POLL_SECS));

        if wifi.wifi().is_connected().unwrap_or(false) {
            down_since = None;
            continue;
        }

        let since = *down_since.get_or_insert_with(Instant::now);
        warn!("station link down for {}s", since.elapsed().as_secs());
        let _ = wifi.wifi_mut().connect();

        if since.elapsed() >= STATION_RESTART_GRACE {
            warn!(
                "station link down past the {}s grace period; restarting",
                STATION_RESTART_GRACE.as_secs()
            );
            unsafe { esp_idf_svc::sys::esp_restart() };
        }
    }
}

// --- Collaborator adapters ---

struct NvsKv {
    nvs: EspNvs<NvsDefault>,
}

impl NvsKv {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, KV_NAMESPACE, true)?,
        })
    }
}

impl KvStore for NvsKv {
    fn get_str(&mut self, key: &str) -> Option<String> {
        let mut buf = [0_u8; 128];
        self.nvs
            .get_str(key, &mut buf)
            .ok()
            .flatten()
            .map(str::to_string)
    }

    fn get_u32(&mut self, key: &str) -> Option<u32> {
        self.nvs.get_u32(key).ok().flatten()
    }

    fn get_i32(&mut self, key: &str) -> Option<i32> {
        self.nvs.get_i32(key).ok().flatten()
    }

    fn get_bool(&mut self, key: &str) -> Option<bool> {
        self.nvs.get_u8(key).ok().flatten().map(|value| value != 0)
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), PersistError> {
        self.nvs
            .set_str(key, value)
            .map_err(|err| PersistError(err.to_string()))
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError> {
        self.nvs
            .set_u32(key, value)
            .map_err(|err| PersistError(err.to_string()))
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), PersistError> {
        self.nvs
            .set_i32(key, value)
            .map_err(|err| PersistError(err.to_string()))
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), PersistError> {
        self.nvs
            .set_u8(key, u8::from(value))
            .map_err(|err| PersistError(err.to_string()))
    }

    fn commit(&mut self) -> Result<(), PersistError> {
        // The NVS driver commits each set at the collaborator boundary;
        // the all-or-nothing guarantee lives there.
        Ok(())
    }
}

struct ClimateSensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
}

impl ClimateSensor {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self { pin, delay: Ets })
    }

    fn read(&mut self) -> Result<(f32, f32), SensorError> {
        self.pin
            .set_high()
            .map_err(|err| SensorError(format!("DHT line setup failed: {err}")))?;

        match dht11::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => Ok((
                f32::from(reading.temperature),
                f32::from(reading.relative_humidity),
            )),
            Err(err) => Err(SensorError(format!("DHT11 read failed: {err:?}"))),
        }
    }
}

struct SoilProbe {
    channel: AdcChannelDriver<'static, Gpio32, AdcDriver<'static, ADC1>>,
}

impl SoilProbe {
    fn new(adc1: ADC1, pin: Gpio32) -> anyhow::Result<Self> {
        let adc = AdcDriver::new(adc1)?;
        let config = AdcChannelConfig {
            attenuation: DB_12,
            ..Default::default()
        };
        Ok(Self {
            channel: AdcChannelDriver::new(adc, pin, &config)?,
        })
    }

    fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.channel
            .read()
            .map_err(|err| SensorError(format!("soil ADC read failed: {err}")))
    }
}

struct Relay {
    pin: PinDriver<'static, Gpio18, Output>,
}

impl Relay {
    fn new(pin: Gpio18) -> anyhow::Result<Self> {
        let mut pin = PinDriver::output(pin)?;
        pin.set_low()?;
        Ok(Self { pin })
    }

    fn apply(&mut self, action: RelayAction) {
        let result = if action.level() {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        if let Err(err) = result {
            warn!("failed to drive relay: {err}");
        }
    }
}

// --- HTTP plumbing ---

fn read_form_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> Result<String, RequestError> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len == 0 {
        return Err(RequestError::EmptyBody);
    }
    if len > MAX_HTTP_BODY {
        return Err(RequestError::BodyTooLarge);
    }

    let mut body = vec![0_u8; len];
    req.read_exact(&mut body)
        .map_err(|_| RequestError::BadField("body"))?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error_json(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&ErrorBody::new(message))?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

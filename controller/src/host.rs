use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use greenhouse_common::{
    climate::minute_of_day, parse_settings_form, ClimateEngine, ControllerConfig, SettingsMirror,
    SettingsRecord, SettingsStore, TempSample, TemperatureHistory,
};

use crate::{
    flash_file::FileFlash,
    link::{self, LinkError, OwnerSnapshot, SettingsEndpoint, SettingsLink},
};

const LINK_CAPACITY: usize = 16;

#[derive(Clone)]
struct AppState {
    link: SettingsLink,
    mirror: Arc<Mutex<SettingsMirror>>,
    history: Arc<Mutex<TemperatureHistory>>,
    timezone: Arc<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct SettingsView {
    settings: SettingsRecord,
    #[serde(rename = "ageMs")]
    age_ms: Option<u64>,
    fresh: bool,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    owner: OwnerSnapshot,
    #[serde(rename = "ventLabel")]
    vent_label: &'static str,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Serialize)]
struct HistoryView {
    capacity: usize,
    samples: Vec<TempSample>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = data_dir();
    let mut config = load_config(&data_dir.join("controller.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load controller config: {err:#}");
            ControllerConfig::default()
        });
    config.sanitize();

    if let Some(port) = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }

    let (link, endpoint) = link::channel(LINK_CAPACITY);
    let flash = FileFlash::new(&data_dir, config.flash.clone());
    info!("simulated flash image at {}", flash.path().display());
    spawn_settings_owner(endpoint, flash, config.clone())?;

    let app_state = AppState {
        link,
        mirror: Arc::new(Mutex::new(SettingsMirror::new())),
        history: Arc::new(Mutex::new(TemperatureHistory::new(config.history_capacity))),
        timezone: Arc::new(config.timezone.clone()),
    };

    spawn_mirror_refresh_loop(
        app_state.clone(),
        Duration::from_millis(config.mirror_refresh_interval_ms),
    );
    spawn_history_loop(
        app_state.clone(),
        Duration::from_millis(config.history_sample_interval_ms),
    );

    let app = router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match app_state.link.flush().await {
        Ok(Ok(true)) => info!("pending settings written before exit"),
        Ok(Ok(false)) => {}
        Ok(Err(err)) => warn!("final settings save failed: {err}"),
        Err(err) => warn!("final settings save skipped: {err}"),
    }
    Ok(())
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_get_status))
        .route("/set", get(handle_set_form))
        .route("/api/settings", get(handle_get_settings))
        .route("/api/settings/reset", post(handle_reset_settings))
        .route("/api/status", get(handle_get_status))
        .route("/api/history", get(handle_get_history))
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Stand-in for the greenhouse probe: a daily curve peaking mid-afternoon.
struct SimulatedSensor {
    mean_c: f32,
    swing_c: f32,
}

impl SimulatedSensor {
    fn new() -> Self {
        Self {
            mean_c: 21.0,
            swing_c: 7.0,
        }
    }

    fn read(&self, minute_of_day: u16) -> Option<f32> {
        let phase = (f32::from(minute_of_day) - 540.0) / 1440.0 * std::f32::consts::TAU;
        Some(self.mean_c + self.swing_c * phase.sin())
    }
}

/// The settings owner. Everything that touches the store runs on this one
/// thread: sensor reads, climate evaluation, request handling and the
/// debounced flash write.
fn spawn_settings_owner(
    mut endpoint: SettingsEndpoint,
    mut flash: FileFlash,
    config: ControllerConfig,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("settings-owner".into())
        .spawn(move || {
            let mut store = SettingsStore::new(config.settings_save_debounce_ms);
            let state = store.initialize(&mut flash, monotonic_ms());
            info!("settings store ready: {}", state.as_str());

            let sensor = SimulatedSensor::new();
            let mut engine = ClimateEngine::new();
            let mut temperature_c = None;
            let mut last_sensor_read_ms: Option<u64> = None;

            loop {
                let now_ms = monotonic_ms();
                let local = local_now(&config.timezone);
                let minute = minute_of_day(local);

                let read_due = last_sensor_read_ms.map_or(true, |last| {
                    now_ms.saturating_sub(last) >= config.sensor_read_interval_ms
                });
                if read_due {
                    temperature_c = sensor.read(minute);
                    last_sensor_read_ms = Some(now_ms);
                }

                let previous = engine.outputs();
                let outputs = engine.evaluate(&store.get(), temperature_c, minute);
                if outputs.vent_stage != previous.vent_stage
                    || outputs.heater_on != previous.heater_on
                    || outputs.shade_open != previous.shade_open
                {
                    info!(
                        "climate: vents {}, heater {}, shade {}",
                        outputs.vent_label(),
                        if outputs.heater_on { "on" } else { "off" },
                        if outputs.shade_open { "open" } else { "closed" }
                    );
                }

                while let Some(request) = endpoint.try_next() {
                    request.serve(&mut store, now_ms, temperature_c, outputs);
                }

                if let Err(err) = store.tick(now_ms) {
                    warn!("debounced settings save failed: {err}");
                }

                thread::sleep(Duration::from_millis(config.control_interval_ms));
            }
        })
        .context("failed to spawn settings owner thread")?;
    Ok(())
}

fn spawn_mirror_refresh_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = refresh_mirror(&app_state).await {
                warn!("settings mirror refresh failed: {err}");
            }
        }
    });
}

fn spawn_history_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match app_state.link.snapshot().await {
                Ok(snapshot) => {
                    let sample = app_state.history.lock().await.record(
                        snapshot.temperature_c,
                        Utc::now().timestamp(),
                        snapshot.outputs.vent_stage,
                        snapshot.outputs.heater_on,
                    );
                    if !sample.valid_timestamp {
                        warn!("history sample recorded without a valid timestamp");
                    }
                }
                Err(err) => warn!("history sample skipped: {err}"),
            }
        }
    });
}

async fn refresh_mirror(app_state: &AppState) -> Result<OwnerSnapshot, LinkError> {
    let snapshot = app_state.link.snapshot().await?;
    app_state
        .mirror
        .lock()
        .await
        .refresh(snapshot.settings, monotonic_ms());
    Ok(snapshot)
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let fresh = match refresh_mirror(&state).await {
        Ok(_) => true,
        Err(err) => {
            warn!("serving cached settings: {err}");
            false
        }
    };

    let mirror = state.mirror.lock().await;
    match mirror.get() {
        Some(settings) => Json(SettingsView {
            settings: *settings,
            age_ms: mirror.age_ms(monotonic_ms()),
            fresh,
        })
        .into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Settings are not available yet",
        ),
    }
}

async fn handle_set_form(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let commands = parse_settings_form(query.as_deref().unwrap_or_default());

    if !commands.is_empty() {
        match state.link.apply(commands).await {
            Ok((report, snapshot)) => {
                info!(
                    "web form applied {} settings call(s), {} rejected",
                    report.applied,
                    report.rejected.len()
                );
                state
                    .mirror
                    .lock()
                    .await
                    .refresh(snapshot.settings, monotonic_ms());
            }
            Err(err) => {
                warn!("web form update failed: {err}");
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Settings owner is unavailable",
                );
            }
        }
    }

    (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
}

async fn handle_reset_settings(State(state): State<AppState>) -> impl IntoResponse {
    match state.link.reset().await {
        Ok(snapshot) => {
            info!("settings reset to defaults from web request");
            state
                .mirror
                .lock()
                .await
                .refresh(snapshot.settings, monotonic_ms());
            Json(snapshot).into_response()
        }
        Err(err) => {
            warn!("settings reset failed: {err}");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Settings owner is unavailable",
            )
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let owner = match state.link.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!("status request failed: {err}");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Settings owner is unavailable",
            );
        }
    };

    let now = now_in_timezone(&state.timezone);
    Json(StatusView {
        vent_label: owner.outputs.vent_label(),
        owner,
        time_synced: now.is_some(),
        timezone: state.timezone.as_ref().clone(),
        now_epoch: Utc::now().timestamp(),
    })
    .into_response()
}

async fn handle_get_history(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.history.lock().await;
    Json(HistoryView {
        capacity: history.capacity(),
        samples: history.samples().copied().collect(),
    })
}

fn data_dir() -> PathBuf {
    std::env::var("GREENHOUSE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.greenhouse"))
}

async fn load_config(path: &Path) -> anyhow::Result<ControllerConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<ControllerConfig>(&raw)
            .with_context(|| format!("malformed config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ControllerConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn now_in_timezone(timezone: &str) -> Option<DateTime<FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn local_now(timezone: &str) -> DateTime<FixedOffset> {
    now_in_timezone(timezone).unwrap_or_else(|| Utc::now().fixed_offset())
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use greenhouse_common::{config::SimulatedFlashConfig, ClimateOutputs};

    use super::*;

    struct Harness {
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (link, endpoint) = link::channel(LINK_CAPACITY);
        let config = ControllerConfig {
            control_interval_ms: 10,
            ..ControllerConfig::default()
        };
        let flash = FileFlash::new(dir.path(), SimulatedFlashConfig::default());
        spawn_settings_owner(endpoint, flash, config).unwrap();

        Harness {
            state: AppState {
                link,
                mirror: Arc::new(Mutex::new(SettingsMirror::new())),
                history: Arc::new(Mutex::new(TemperatureHistory::new(4))),
                timezone: Arc::new("America/New_York".to_string()),
            },
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("controller.json"))
            .await
            .unwrap();

        assert_eq!(config.http_port, 8080);
        assert_eq!(config.settings_save_debounce_ms, 5_000);
    }

    #[tokio::test]
    async fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = load_config(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("malformed config"));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert!(now_in_timezone("Mars/Olympus_Mons").is_none());
        assert_eq!(local_now("Mars/Olympus_Mons").offset().local_minus_utc(), 0);
        assert!(now_in_timezone("America/New_York").is_some());
    }

    #[test]
    fn simulated_sensor_peaks_mid_afternoon() {
        let sensor = SimulatedSensor::new();
        let peak = sensor.read(15 * 60).unwrap();
        let trough = sensor.read(3 * 60).unwrap();

        assert!((peak - 28.0).abs() < 0.01);
        assert!((trough - 14.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn web_form_updates_owner_and_redirects() {
        let harness = harness();
        let response = handle_set_form(
            State(harness.state.clone()),
            RawQuery(Some("vent1_temp=26.5&day_start_hr=6".to_string())),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let mirrored = harness.state.mirror.lock().await.get().copied().unwrap();
        assert_eq!(mirrored.vent_open_temp_stage1, 26.5);
        assert_eq!((mirrored.day_start_hour, mirrored.day_start_minute), (6, 0));

        let owner = harness.state.link.snapshot().await.unwrap();
        assert_eq!(owner.settings, mirrored);
        assert!(owner.dirty);
    }

    #[tokio::test]
    async fn half_pair_form_keeps_owner_value_for_missing_half() {
        let harness = harness();
        harness
            .state
            .link
            .apply(vec![greenhouse_common::SettingsCommand::SetDayStartTime(9, 0)])
            .await
            .unwrap();
        assert!(harness.state.mirror.lock().await.get().is_none());

        let response = handle_set_form(
            State(harness.state.clone()),
            RawQuery(Some("day_start_min=10".to_string())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::FOUND);

        let owner = harness.state.link.snapshot().await.unwrap().settings;
        assert_eq!((owner.day_start_hour, owner.day_start_minute), (9, 10));
        assert_eq!(
            harness.state.mirror.lock().await.get().copied(),
            Some(owner)
        );
    }

    #[tokio::test]
    async fn empty_form_only_redirects() {
        let harness = harness();
        let response = handle_set_form(State(harness.state.clone()), RawQuery(None))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(harness.state.mirror.lock().await.get().is_none());
        assert!(!harness.state.link.snapshot().await.unwrap().dirty);
    }

    #[tokio::test]
    async fn reset_restores_defaults_in_mirror() {
        let harness = harness();
        harness
            .state
            .link
            .apply(vec![greenhouse_common::SettingsCommand::SetHysteresis(2.0)])
            .await
            .unwrap();

        let response = handle_reset_settings(State(harness.state.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            harness.state.mirror.lock().await.get().copied(),
            Some(SettingsRecord::default())
        );
    }

    #[tokio::test]
    async fn settings_view_needs_a_snapshot() {
        let (link, endpoint) = link::channel(1);
        drop(endpoint);
        let state = AppState {
            link,
            mirror: Arc::new(Mutex::new(SettingsMirror::new())),
            history: Arc::new(Mutex::new(TemperatureHistory::new(4))),
            timezone: Arc::new("UTC".to_string()),
        };

        let response = handle_get_settings(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state
            .mirror
            .lock()
            .await
            .refresh(SettingsRecord::default(), monotonic_ms());
        let response = handle_get_settings(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn status_view_flattens_owner_snapshot() {
        let view = StatusView {
            owner: OwnerSnapshot {
                settings: SettingsRecord::default(),
                store_state: "VALID",
                dirty: false,
                persistence_enabled: true,
                temperature_c: Some(22.0),
                outputs: ClimateOutputs::default(),
            },
            vent_label: "Closed",
            time_synced: true,
            timezone: "UTC".to_string(),
            now_epoch: 1_700_000_000,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["storeState"], "VALID");
        assert_eq!(json["ventLabel"], "Closed");
        assert_eq!(json["settings"]["ventOpenTempStage1"], 25.0);
        assert_eq!(json["outputs"]["heaterOn"], false);
    }
}

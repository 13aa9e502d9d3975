use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::LabelTable;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::ingest::SourceConfig;
use crate::notify::{MqttSettings, DEFAULT_MQTT_CLIENT_ID, DEFAULT_MQTT_TOPIC};
use crate::pipeline::{PipelineSettings, DEFAULT_STALE_TRACK_SECS};
use crate::policy::DEFAULT_THRESHOLD_KMH;
use crate::speed::{SpeedSettings, DEFAULT_DEBOUNCE_SECS, DEFAULT_METERS_PER_PIXEL};

const DEFAULT_DB_PATH: &str = "speedtrap.db";
const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:8798";
const DEFAULT_TRACKER: &str = "scripted";

#[derive(Debug, Deserialize, Default)]
struct SpeedtrapConfigFile {
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    speed: Option<SpeedConfigFile>,
    policy: Option<PolicyConfigFile>,
    events: Option<EventsConfigFile>,
    admin: Option<AdminConfigFile>,
    notify: Option<NotifyConfigFile>,
    labels: Option<Vec<String>>,
    tracker: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    path: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeedConfigFile {
    debounce_secs: Option<f64>,
    meters_per_pixel: Option<f64>,
    stale_track_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    default_threshold_kmh: Option<f64>,
    plate_pattern: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct AdminConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    mqtt_broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpeedtrapConfig {
    pub db_path: String,
    pub source: SourceConfig,
    pub speed: SpeedSettings,
    pub stale_track_secs: f64,
    pub default_threshold_kmh: f64,
    pub plate_pattern: Option<Regex>,
    pub event_capacity: usize,
    pub admin_addr: String,
    pub admin_token_path: Option<PathBuf>,
    /// MQTT notifications are off unless a broker is configured.
    pub mqtt: Option<MqttSettings>,
    pub labels: LabelTable,
    pub tracker: String,
}

impl SpeedtrapConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SPEEDTRAP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SpeedtrapConfigFile) -> Result<Self> {
        let defaults = SourceConfig::default();
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            path: source_file.path.unwrap_or(defaults.path),
            width: source_file.width.unwrap_or(defaults.width),
            height: source_file.height.unwrap_or(defaults.height),
            fps: source_file.fps.unwrap_or(defaults.fps),
            frames: source_file.frames.unwrap_or(defaults.frames),
        };

        let speed_file = file.speed.unwrap_or_default();
        let speed = SpeedSettings {
            debounce_secs: speed_file.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS),
            meters_per_pixel: speed_file
                .meters_per_pixel
                .unwrap_or(DEFAULT_METERS_PER_PIXEL),
        };

        let policy_file = file.policy.unwrap_or_default();
        let plate_pattern = policy_file
            .plate_pattern
            .as_deref()
            .map(compile_plate_pattern)
            .transpose()?;

        let notify_file = file.notify.unwrap_or_default();
        let mqtt = notify_file.mqtt_broker.map(|broker_addr| MqttSettings {
            broker_addr,
            topic: notify_file
                .topic
                .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
            client_id: notify_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            username: notify_file.username,
            password: notify_file.password,
        });

        let admin_file = file.admin.unwrap_or_default();
        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            source,
            speed,
            stale_track_secs: speed_file
                .stale_track_secs
                .unwrap_or(DEFAULT_STALE_TRACK_SECS),
            default_threshold_kmh: policy_file
                .default_threshold_kmh
                .unwrap_or(DEFAULT_THRESHOLD_KMH),
            plate_pattern,
            event_capacity: file
                .events
                .and_then(|events| events.capacity)
                .unwrap_or(DEFAULT_EVENT_CAPACITY),
            admin_addr: admin_file
                .addr
                .unwrap_or_else(|| DEFAULT_ADMIN_ADDR.to_string()),
            admin_token_path: admin_file.token_path,
            mqtt,
            labels: file.labels.map(LabelTable::new).unwrap_or_default(),
            tracker: file.tracker.unwrap_or_else(|| DEFAULT_TRACKER.to_string()),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("SPEEDTRAP_DB_PATH") {
            self.db_path = path;
        }
        if let Some(source) = env_nonempty("SPEEDTRAP_SOURCE") {
            self.source.path = source;
        }
        if let Some(value) = env_nonempty("SPEEDTRAP_THRESHOLD_KMH") {
            self.default_threshold_kmh = parse_env_f64("SPEEDTRAP_THRESHOLD_KMH", &value)?;
        }
        if let Some(value) = env_nonempty("SPEEDTRAP_DEBOUNCE_SECS") {
            self.speed.debounce_secs = parse_env_f64("SPEEDTRAP_DEBOUNCE_SECS", &value)?;
        }
        if let Some(value) = env_nonempty("SPEEDTRAP_METERS_PER_PIXEL") {
            self.speed.meters_per_pixel = parse_env_f64("SPEEDTRAP_METERS_PER_PIXEL", &value)?;
        }
        if let Some(addr) = env_nonempty("SPEEDTRAP_ADMIN_ADDR") {
            self.admin_addr = addr;
        }
        if let Some(broker_addr) = env_nonempty("SPEEDTRAP_MQTT_BROKER") {
            match self.mqtt.as_mut() {
                Some(mqtt) => mqtt.broker_addr = broker_addr,
                None => {
                    self.mqtt = Some(MqttSettings {
                        broker_addr,
                        ..MqttSettings::default()
                    })
                }
            }
        }
        if let Some(mqtt) = self.mqtt.as_mut() {
            if let Some(username) = env_nonempty("SPEEDTRAP_MQTT_USERNAME") {
                mqtt.username = Some(username);
            }
            if let Some(password) = env_nonempty("SPEEDTRAP_MQTT_PASSWORD") {
                mqtt.password = Some(password);
            }
        }
        if let Some(pattern) = env_nonempty("SPEEDTRAP_PLATE_PATTERN") {
            self.plate_pattern = Some(compile_plate_pattern(&pattern)?);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.source.validate()?;
        let debounce = self.speed.debounce_secs;
        if !debounce.is_finite() || debounce < 0.0 {
            return Err(anyhow!("speed.debounce_secs must be a non-negative number"));
        }
        let scale = self.speed.meters_per_pixel;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(anyhow!("speed.meters_per_pixel must be greater than zero"));
        }
        if !self.stale_track_secs.is_finite() || self.stale_track_secs <= 0.0 {
            return Err(anyhow!("speed.stale_track_secs must be greater than zero"));
        }
        let threshold = self.default_threshold_kmh;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(anyhow!("policy.default_threshold_kmh must be a non-negative number"));
        }
        if self.event_capacity == 0 {
            return Err(anyhow!("events.capacity must be greater than zero"));
        }
        if self.admin_addr.trim().is_empty() {
            return Err(anyhow!("admin.addr must not be empty"));
        }
        if self.tracker.trim().is_empty() {
            return Err(anyhow!("tracker must not be empty"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            speed: self.speed,
            stale_track_secs: Some(self.stale_track_secs),
            default_threshold_kmh: self.default_threshold_kmh,
            ..PipelineSettings::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<SpeedtrapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn compile_plate_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow!("invalid plate pattern {:?}: {}", pattern, e))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_f64(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number", key))
}

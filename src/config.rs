use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::camera::{PinMap, Resolution};
use crate::net::{WifiSettings, DEFAULT_MAX_RETRY};

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_XCLK_HZ: u32 = 20_000_000;
const DEFAULT_RESOLUTION: Resolution = Resolution::Qvga;
const DEFAULT_JPEG_QUALITY: u8 = 12;
const DEFAULT_PROVISIONING_AP: &str = "PROV_ESP32";
const DEFAULT_INPUT_WIDTH: u32 = 224;
const DEFAULT_INPUT_HEIGHT: u32 = 224;
const DEFAULT_ARENA_BYTES: usize = 250 * 1024;

#[derive(Debug, Deserialize, Default)]
struct NodeConfigFile {
    http_addr: Option<String>,
    sensor: Option<SensorConfigFile>,
    wifi: Option<WifiConfigFile>,
    inference: Option<InferenceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    xclk_hz: Option<u32>,
    resolution: Option<String>,
    jpeg_quality: Option<u8>,
    stub: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct WifiConfigFile {
    ssid: Option<String>,
    password: Option<String>,
    max_retry: Option<u32>,
    provisioning_ap: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    arena_bytes: Option<usize>,
}

/// Runtime configuration. Read once at startup; not runtime-reloadable.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub http_addr: String,
    pub sensor: SensorSettings,
    pub wifi: WifiSettings,
    pub inference: InferenceSettings,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub pins: PinMap,
    pub xclk_hz: u32,
    pub resolution: Resolution,
    pub jpeg_quality: u8,
    /// `true` selects the in-crate stub driver; `false` requires a hardware
    /// backend linked into the build.
    pub stub: bool,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    /// `None` disables inference; no /detect route is registered.
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub arena_bytes: usize,
}

impl NodeConfig {
    /// Load configuration: defaults, then the JSON file (the given path or
    /// `CAMNODE_CONFIG`), then `CAMNODE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("CAMNODE_CONFIG").ok().map(PathBuf::from);
        let file_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match file_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NodeConfigFile) -> Result<Self> {
        let http_addr = file
            .http_addr
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let sensor = SensorSettings {
            pins: PinMap::default(),
            xclk_hz: file
                .sensor
                .as_ref()
                .and_then(|s| s.xclk_hz)
                .unwrap_or(DEFAULT_XCLK_HZ),
            resolution: match file.sensor.as_ref().and_then(|s| s.resolution.as_deref()) {
                Some(value) => Resolution::parse(value)?,
                None => DEFAULT_RESOLUTION,
            },
            jpeg_quality: file
                .sensor
                .as_ref()
                .and_then(|s| s.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
            stub: file.sensor.as_ref().and_then(|s| s.stub).unwrap_or(true),
        };
        let wifi = WifiSettings {
            ssid: file
                .wifi
                .as_ref()
                .and_then(|w| w.ssid.clone())
                .unwrap_or_default(),
            password: file
                .wifi
                .as_ref()
                .and_then(|w| w.password.clone())
                .unwrap_or_default(),
            max_retry: file
                .wifi
                .as_ref()
                .and_then(|w| w.max_retry)
                .unwrap_or(DEFAULT_MAX_RETRY),
            provisioning_ap: file
                .wifi
                .as_ref()
                .and_then(|w| w.provisioning_ap.clone())
                .unwrap_or_else(|| DEFAULT_PROVISIONING_AP.to_string()),
        };
        let inference = InferenceSettings {
            model_path: file.inference.as_ref().and_then(|i| i.model_path.clone()),
            input_width: file
                .inference
                .as_ref()
                .and_then(|i| i.input_width)
                .unwrap_or(DEFAULT_INPUT_WIDTH),
            input_height: file
                .inference
                .as_ref()
                .and_then(|i| i.input_height)
                .unwrap_or(DEFAULT_INPUT_HEIGHT),
            arena_bytes: file
                .inference
                .and_then(|i| i.arena_bytes)
                .unwrap_or(DEFAULT_ARENA_BYTES),
        };
        Ok(Self {
            http_addr,
            sensor,
            wifi,
            inference,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CAMNODE_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http_addr = addr;
            }
        }
        if let Ok(ssid) = std::env::var("CAMNODE_WIFI_SSID") {
            if !ssid.trim().is_empty() {
                self.wifi.ssid = ssid;
            }
        }
        if let Ok(password) = std::env::var("CAMNODE_WIFI_PASSWORD") {
            self.wifi.password = password;
        }
        if let Ok(resolution) = std::env::var("CAMNODE_RESOLUTION") {
            if !resolution.trim().is_empty() {
                self.sensor.resolution = Resolution::parse(&resolution)?;
            }
        }
        if let Ok(quality) = std::env::var("CAMNODE_JPEG_QUALITY") {
            if !quality.trim().is_empty() {
                self.sensor.jpeg_quality = quality
                    .parse()
                    .map_err(|_| anyhow!("CAMNODE_JPEG_QUALITY must be an integer"))?;
            }
        }
        if let Ok(backend) = std::env::var("CAMNODE_SENSOR") {
            if !backend.trim().is_empty() {
                self.sensor.stub = parse_sensor_backend(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("CAMNODE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.inference.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.wifi.max_retry == 0 {
            return Err(anyhow!("wifi max_retry must be greater than zero"));
        }
        if self.sensor.jpeg_quality == 0 || self.sensor.jpeg_quality > 63 {
            return Err(anyhow!("jpeg_quality must be in 1..=63"));
        }
        if self.inference.arena_bytes == 0 {
            return Err(anyhow!("inference arena_bytes must be greater than zero"));
        }
        if self.inference.input_width == 0 || self.inference.input_height == 0 {
            return Err(anyhow!("inference input dimensions must be non-zero"));
        }
        Ok(())
    }
}

fn parse_sensor_backend(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "stub" => Ok(true),
        "hardware" => Ok(false),
        other => Err(anyhow!(
            "unknown sensor backend '{}' (expected 'stub' or 'hardware')",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<NodeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{WireFormat, DEFAULT_JPEG_QUALITY};
use crate::detect::Detection;

const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_CLASS_NAMES: [&str; 2] = ["Normal", "Shoplifting"];
const DEFAULT_FONT_PX: f32 = 16.0;
const DEFAULT_LINE_WIDTH: u32 = 2;
const DEFAULT_IMGBB_ENDPOINT: &str = "https://api.imgbb.com/1/upload";
const DEFAULT_FIREBASE_PATH: &str = "alerts";
pub const DEFAULT_ALERT_CLASS: &str = "Shoplifting";

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    wire_format: Option<WireFormat>,
    jpeg_quality: Option<u8>,
    detector: Option<DetectorConfigFile>,
    render: Option<RenderConfigFile>,
    alerts: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
    stub_detections: Option<Vec<Detection>>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    font_path: Option<PathBuf>,
    font_px: Option<f32>,
    line_width: Option<u32>,
    class_colors: Option<BTreeMap<String, [u8; 3]>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    alert_class: Option<String>,
    cooldown_secs: Option<u64>,
    imgbb_api_key: Option<String>,
    imgbb_endpoint: Option<String>,
    evidence_dir: Option<PathBuf>,
    firebase_url: Option<String>,
    firebase_auth: Option<String>,
    firebase_path: Option<String>,
    sqlite_path: Option<PathBuf>,
}

/// Resolved configuration for the detection service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    pub wire_format: WireFormat,
    pub jpeg_quality: u8,
    pub detector: DetectorSettings,
    pub render: RenderSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Model class index -> label.
    pub class_names: Vec<String>,
    /// Detections replayed by the stub backend.
    pub stub_detections: Vec<Detection>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            stub_detections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub font_path: Option<PathBuf>,
    pub font_px: f32,
    pub line_width: u32,
    /// Overrides and additions to the built-in class palette.
    pub class_colors: BTreeMap<String, [u8; 3]>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            font_path: None,
            font_px: DEFAULT_FONT_PX,
            line_width: DEFAULT_LINE_WIDTH,
            class_colors: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub alert_class: String,
    pub cooldown: Option<Duration>,
    pub imgbb_api_key: Option<String>,
    pub imgbb_endpoint: String,
    pub evidence_dir: Option<PathBuf>,
    pub firebase_url: Option<String>,
    pub firebase_auth: Option<String>,
    pub firebase_path: String,
    pub sqlite_path: Option<PathBuf>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            alert_class: DEFAULT_ALERT_CLASS.to_string(),
            cooldown: None,
            imgbb_api_key: None,
            imgbb_endpoint: DEFAULT_IMGBB_ENDPOINT.to_string(),
            evidence_dir: None,
            firebase_url: None,
            firebase_auth: None,
            firebase_path: DEFAULT_FIREBASE_PATH.to_string(),
            sqlite_path: None,
        }
    }
}

/// Where alert evidence images are hosted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageHostSettings {
    Disabled,
    Imgbb { api_key: String, endpoint: String },
    Directory { dir: PathBuf },
}

/// Where alert records are appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStoreSettings {
    Disabled,
    Firebase {
        database_url: String,
        auth: Option<String>,
        path: String,
    },
    Sqlite { path: PathBuf },
}

impl AlertSettings {
    /// ImgBB wins over a local evidence directory when both are configured.
    pub fn image_host(&self) -> ImageHostSettings {
        if let Some(api_key) = &self.imgbb_api_key {
            return ImageHostSettings::Imgbb {
                api_key: api_key.clone(),
                endpoint: self.imgbb_endpoint.clone(),
            };
        }
        match &self.evidence_dir {
            Some(dir) => ImageHostSettings::Directory { dir: dir.clone() },
            None => ImageHostSettings::Disabled,
        }
    }

    /// Firebase wins over a local SQLite log when both are configured.
    pub fn store(&self) -> AlertStoreSettings {
        if let Some(database_url) = &self.firebase_url {
            return AlertStoreSettings::Firebase {
                database_url: database_url.clone(),
                auth: self.firebase_auth.clone(),
                path: self.firebase_path.clone(),
            };
        }
        match &self.sqlite_path {
            Some(path) => AlertStoreSettings::Sqlite { path: path.clone() },
            None => AlertStoreSettings::Disabled,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            wire_format: WireFormat::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            detector: DetectorSettings::default(),
            render: RenderSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Defaults, overlaid by the JSON file named in `SENTRY_CONFIG`, overlaid
    /// by individual `SENTRY_*` environment variables.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let render = file.render.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let render_defaults = RenderSettings::default();
        let alert_defaults = AlertSettings::default();

        Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            max_body_bytes: api.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            wire_format: file.wire_format.unwrap_or(defaults.wire_format),
            jpeg_quality: file.jpeg_quality.unwrap_or(defaults.jpeg_quality),
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(detector_defaults.backend),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(detector_defaults.input_size),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(detector_defaults.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(detector_defaults.iou_threshold),
                class_names: detector
                    .class_names
                    .unwrap_or(detector_defaults.class_names),
                stub_detections: detector.stub_detections.unwrap_or_default(),
            },
            render: RenderSettings {
                font_path: render.font_path,
                font_px: render.font_px.unwrap_or(render_defaults.font_px),
                line_width: render.line_width.unwrap_or(render_defaults.line_width),
                class_colors: render.class_colors.unwrap_or_default(),
            },
            alerts: AlertSettings {
                alert_class: alerts.alert_class.unwrap_or(alert_defaults.alert_class),
                cooldown: alerts
                    .cooldown_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
                imgbb_api_key: alerts.imgbb_api_key,
                imgbb_endpoint: alerts
                    .imgbb_endpoint
                    .unwrap_or(alert_defaults.imgbb_endpoint),
                evidence_dir: alerts.evidence_dir,
                firebase_url: alerts.firebase_url,
                firebase_auth: alerts.firebase_auth,
                firebase_path: alerts
                    .firebase_path
                    .unwrap_or(alert_defaults.firebase_path),
                sqlite_path: alerts.sqlite_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_nonempty("SENTRY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(format) = env_nonempty("SENTRY_WIRE_FORMAT") {
            self.wire_format = format.parse()?;
        }
        if let Some(backend) = env_nonempty("SENTRY_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_nonempty("SENTRY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(names) = env_nonempty("SENTRY_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.detector.class_names = parsed;
            }
        }
        if let Some(path) = env_nonempty("SENTRY_FONT_PATH") {
            self.render.font_path = Some(PathBuf::from(path));
        }
        if let Some(class) = env_nonempty("SENTRY_ALERT_CLASS") {
            self.alerts.alert_class = class;
        }
        if let Some(cooldown) = env_nonempty("SENTRY_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("SENTRY_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alerts.cooldown = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        if let Some(key) = env_nonempty("SENTRY_IMGBB_API_KEY") {
            self.alerts.imgbb_api_key = Some(key);
        }
        if let Some(dir) = env_nonempty("SENTRY_EVIDENCE_DIR") {
            self.alerts.evidence_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = env_nonempty("SENTRY_FIREBASE_URL") {
            self.alerts.firebase_url = Some(url);
        }
        if let Some(auth) = env_nonempty("SENTRY_FIREBASE_AUTH") {
            self.alerts.firebase_auth = Some(auth);
        }
        if let Some(path) = env_nonempty("SENTRY_ALERT_DB") {
            self.alerts.sqlite_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        let detector = &self.detector;
        if detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&detector.confidence_threshold)
            || !(0.0..=1.0).contains(&detector.iou_threshold)
        {
            return Err(anyhow!("detector thresholds must be within 0.0..=1.0"));
        }
        if self.render.line_width == 0 || self.render.font_px <= 0.0 {
            return Err(anyhow!("render line_width and font_px must be positive"));
        }
        self.alerts.alert_class = self.alerts.alert_class.trim().to_string();
        if self.alerts.alert_class.is_empty() {
            return Err(anyhow!("alert_class must not be empty"));
        }
        if let Some(database_url) = self.alerts.firebase_url.take() {
            url::Url::parse(&database_url)
                .map_err(|e| anyhow!("invalid firebase url '{}': {}", database_url, e))?;
            self.alerts.firebase_url = Some(database_url.trim_end_matches('/').to_string());
        }
        self.alerts.firebase_path = self.alerts.firebase_path.trim_matches('/').to_string();
        if self.alerts.firebase_path.is_empty() {
            return Err(anyhow!("firebase_path must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

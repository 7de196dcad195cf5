use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    pub output: OutputConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Model file not found: {0:?}")]
    ModelNotFound(PathBuf),
    #[error("Labels file not found: {0:?}")]
    LabelsNotFound(PathBuf),
    #[error("Confidence threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f32),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

pub trait Validatable {
    fn validate(&self) -> Result<(), ConfigValidationError>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default)]
    pub outputs: OutputNames,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_detections() -> usize {
    100
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.get_path().exists() {
            return Err(ConfigValidationError::ModelNotFound(self.get_path()));
        }
        if self.num_instances == 0 {
            return Err(ConfigValidationError::NotPositive("model.num_instances"));
        }
        if self.max_detections == 0 {
            return Err(ConfigValidationError::NotPositive("model.max_detections"));
        }
        Ok(())
    }
}

/// Output tensor names of a detector exported from the TensorFlow Object
/// Detection API.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputNames {
    pub num_detections: String,
    pub classes: String,
    pub boxes: String,
    pub scores: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            num_detections: "num_detections".into(),
            classes: "detection_classes".into(),
            boxes: "detection_boxes".into(),
            scores: "detection_scores".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl LabelsConfig {
    pub fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

impl Validatable for LabelsConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.get_path().exists() {
            return Err(ConfigValidationError::LabelsNotFound(self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_confidence_threshold() -> f32 {
    0.4
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl Validatable for DetectionConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigValidationError::ThresholdOutOfRange(
                self.confidence_threshold,
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnnotationConfig {
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default = "default_min_font_size")]
    pub min_font_size: f32,
    #[serde(default = "default_font_width_divisor")]
    pub font_width_divisor: f32,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: u32,
}

fn default_min_font_size() -> f32 {
    60.0
}

fn default_font_width_divisor() -> f32 {
    15.0
}

fn default_stroke_width() -> u32 {
    6
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            min_font_size: default_min_font_size(),
            font_width_divisor: default_font_width_divisor(),
            stroke_width: default_stroke_width(),
        }
    }
}

impl Validatable for AnnotationConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.font_width_divisor <= 0.0 {
            return Err(ConfigValidationError::NotPositive(
                "annotation.font_width_divisor",
            ));
        }
        if self.stroke_width == 0 {
            return Err(ConfigValidationError::NotPositive("annotation.stroke_width"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub static_dir: PathBuf,
    #[serde(default = "default_unique_names")]
    pub unique_names: bool,
}

fn default_unique_names() -> bool {
    true
}

#[derive(Error, Debug, PartialEq)]
#[error("`{value}` is not a supported {setting}, expected one of: {expected}")]
pub struct UnsupportedSetting {
    setting: &'static str,
    value: String,
    expected: &'static str,
}

/// Selects `configuration/<name>.yaml` on top of `base.yaml`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = UnsupportedSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            _ => Err(UnsupportedSetting {
                setting: "environment",
                value: s.to_string(),
                expected: "local, production",
            }),
        }
    }
}

/// Default verbosity, used when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl FromStr for LogLevel {
    type Err = UnsupportedSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            _ => Err(UnsupportedSetting {
                setting: "log level",
                value: s.to_string(),
                expected: "debug, info, warn",
            }),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.model.validate()?;
        if let Some(labels) = &self.labels {
            labels.validate()?;
        }
        self.detection.validate()?;
        self.annotation.validate()?;
        Ok(())
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .parse()
        .map_err(|e: UnsupportedSetting| config::ConfigError::Message(e.to_string()))?;

    load_configuration(&configuration_directory, environment)
}

pub fn load_configuration(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e.to_string()));
    }

    Ok(config)
}

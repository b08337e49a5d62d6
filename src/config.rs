use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use facereview_vision::{DetectOptions, PipelineOptions};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{self, Action};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEREVIEW_CONFIG_PATH") {
    Some(p) => PathBuf::from(p),
    None => directories::ProjectDirs::from("", "", "facereview")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/facereview/config.toml")),
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEREVIEW_DATA_PREFIX").unwrap_or("/usr/local/share/facereview"))
});

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("database.limit must be greater than zero")]
    ZeroLimit,
    #[error("recognition.tolerance must be a positive number, got {0}")]
    Tolerance(f32),
    #[error("recognition.{name} must be in (0, 1], got {value}")]
    Threshold { name: &'static str, value: f32 },
    #[error("recognition.jitters must be at least 1")]
    ZeroJitters,
    #[error("review.min_confidence must be a finite number, got {0}")]
    Confidence(f64),
    #[error("no keys bound to {0:?}")]
    Unbound(Action),
    #[error("unknown key name {0:?}")]
    UnknownKey(String),
    #[error("key {key:?} bound to both {first:?} and {second:?}")]
    DuplicateKey {
        key: String,
        first: Action,
        second: Action,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub database: String,
    pub collection: String,
    /// Maximum number of alarms fetched.
    pub limit: usize,
    /// Review most recent alarms first.
    pub descending: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "zm".to_string(),
            collection: "alarms".to_string(),
            limit: 2000,
            descending: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Known-face table, `.json` or postcard.
    pub encodings_path: PathBuf,
    /// YuNet-format detector.
    pub detector_model: PathBuf,
    /// SFace-format recognizer.
    pub recognizer_model: PathBuf,
    /// Largest embedding distance accepted as a match.
    pub tolerance: f32,
    pub upsample: u32,
    pub jitters: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            encodings_path: DATA_PREFIX.join("encodings.json"),
            detector_model: DATA_PREFIX.join("models/face_detection_yunet_2023mar.onnx"),
            recognizer_model: DATA_PREFIX.join("models/face_recognition_sface_2021dec.onnx"),
            tolerance: 1.1,
            upsample: 1,
            jitters: 1,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

impl RecognitionConfig {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            detect: DetectOptions {
                score_threshold: self.score_threshold,
                nms_threshold: self.nms_threshold,
                upsample: self.upsample,
            },
            jitters: self.jitters,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    pub save_dir: PathBuf,
    /// Object detection confidence (0-100) a person must exceed.
    pub min_confidence: f64,
    pub person_label: String,
    pub unknown_label: String,
    pub font_path: PathBuf,
    pub window_title: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        let save_dir = directories::ProjectDirs::from("", "", "facereview")
            .map(|d| d.data_dir().join("saved_images"))
            .unwrap_or_else(|| PathBuf::from("saved_images"));
        Self {
            save_dir,
            min_confidence: 60.0,
            person_label: "person".to_string(),
            unknown_label: "Unknown".to_string(),
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            window_title: "face detection results".to_string(),
        }
    }
}

/// Key names as reported by the window, e.g. `"Q"`, `"Escape"`, `"Left"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyBindings {
    pub quit: Vec<String>,
    pub save: Vec<String>,
    pub back: Vec<String>,
    pub advance: Vec<String>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            quit: names(&["Q", "Escape"]),
            save: names(&["S"]),
            back: names(&["Left", "Down"]),
            advance: names(&["Space", "Right", "Up"]),
        }
    }
}

impl KeyBindings {
    fn groups(&self) -> [(Action, &[String]); 4] {
        [
            (Action::Quit, self.quit.as_slice()),
            (Action::Save, self.save.as_slice()),
            (Action::Back, self.back.as_slice()),
            (Action::Advance, self.advance.as_slice()),
        ]
    }

    /// Resolve into a key-name lookup table.
    pub fn resolve(&self) -> Result<HashMap<String, Action>, ConfigError> {
        let mut table = HashMap::new();
        for (action, names) in self.groups() {
            if names.is_empty() {
                return Err(ConfigError::Unbound(action));
            }
            for name in names {
                if !keys::is_known_key(name) {
                    return Err(ConfigError::UnknownKey(name.clone()));
                }
                if let Some(first) = table.insert(name.clone(), action) {
                    if first != action {
                        return Err(ConfigError::DuplicateKey {
                            key: name.clone(),
                            first,
                            second: action,
                        });
                    }
                }
            }
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub recognition: RecognitionConfig,
    pub review: ReviewConfig,
    pub keys: KeyBindings,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        let r = &self.recognition;
        if !(r.tolerance.is_finite() && r.tolerance > 0.0) {
            return Err(ConfigError::Tolerance(r.tolerance));
        }
        for (name, value) in [
            ("score_threshold", r.score_threshold),
            ("nms_threshold", r.nms_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Threshold { name, value });
            }
        }
        if r.jitters == 0 {
            return Err(ConfigError::ZeroJitters);
        }
        if !self.review.min_confidence.is_finite() {
            return Err(ConfigError::Confidence(self.review.min_confidence));
        }
        self.keys.resolve()?;
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

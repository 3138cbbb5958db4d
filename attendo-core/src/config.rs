use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub windows: WindowsConfig,
    pub recognition: RecognitionConfig,
    pub enrollment: EnrollmentConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
    pub overlay: OverlayConfig,
    pub storage: StorageConfig,
}

/// Closed daily time interval, written as `"HH:MM:SS"` in TOML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Both ends are inclusive
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }

    fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub check_in: TimeWindow,
    pub check_out: TimeWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Maximum Euclidean distance for a stored embedding to count as a match
    pub tolerance: f32,
    /// Minimum seconds between two log calls for the same identifier
    pub throttle_secs: u64,
    /// Frames are downscaled by this factor before detection (0.25 = quarter size)
    pub detection_scale: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub images_to_capture: u32,
    pub capture_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
}

/// Text drawn on annotated frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font for names and messages; boxes are still drawn without it
    pub font_path: PathBuf,
    pub font_size: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One subdirectory per enrolled student, named by identifier
    pub dataset_dir: PathBuf,
    pub encodings_path: PathBuf,
    pub ledger_path: PathBuf,
    pub details_path: PathBuf,
}

impl RecognitionConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }
}

impl EnrollmentConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/attendo/attendo.toml (system-wide)
    /// 2. ~/.config/attendo/attendo.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/attendo/attendo.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("attendo")
                .join("attendo.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate an explicit config file. Errors are not masked by
    /// the fallback chain.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = &self.windows;
        for (label, window) in [("check_in", &windows.check_in), ("check_out", &windows.check_out)] {
            if window.start > window.end {
                return Err(ConfigError::Validation(format!(
                    "{} window starts after it ends ({} > {})",
                    label, window.start, window.end
                )));
            }
        }

        if windows.check_in.overlaps(&windows.check_out) {
            return Err(ConfigError::Validation(
                "Check-in and check-out windows must not overlap".to_string(),
            ));
        }

        if self.recognition.tolerance.is_nan() || self.recognition.tolerance <= 0.0 {
            return Err(ConfigError::Validation(
                "Recognition tolerance must be greater than 0".to_string(),
            ));
        }

        let scale = self.recognition.detection_scale;
        if scale.is_nan() || scale <= 0.0 || scale > 1.0 {
            return Err(ConfigError::Validation(
                "Detection scale must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.enrollment.images_to_capture == 0 {
            return Err(ConfigError::Validation(
                "Images to capture must be greater than 0".to_string(),
            ));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Validation(
                "Camera dimensions must be non-zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        let size = self.overlay.font_size;
        if size.is_nan() || size <= 0.0 {
            return Err(ConfigError::Validation(
                "Overlay font size must be greater than 0".to_string(),
            ));
        }

        let storage = &self.storage;
        for (label, path) in [
            ("dataset_dir", &storage.dataset_dir),
            ("encodings_path", &storage.encodings_path),
            ("ledger_path", &storage.ledger_path),
            ("details_path", &storage.details_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!("{} cannot be empty", label)));
            }
        }

        Ok(())
    }
}

fn hms(hour: u32, min: u32, sec: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, min, sec).unwrap_or(NaiveTime::MIN)
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            check_in: TimeWindow::new(hms(9, 30, 0), hms(10, 0, 0)),
            check_out: TimeWindow::new(hms(16, 30, 0), hms(17, 30, 0)),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            throttle_secs: 5,
            detection_scale: 0.25,
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            images_to_capture: 5,
            capture_interval_ms: 1000,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/scrfd_500m.onnx"),
            confidence_threshold: 0.5,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/arcface_mobilefacenet.onnx"),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            font_size: 20.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("data/dataset"),
            encodings_path: PathBuf::from("data/encodings.bin"),
            ledger_path: PathBuf::from("data/attendance_report.csv"),
            details_path: PathBuf::from("data/student_details.csv"),
        }
    }
}

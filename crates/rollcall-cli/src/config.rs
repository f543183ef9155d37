use rollcall_core::MatchPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration.
///
/// Built from defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables, each layer overriding the previous one.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// One sub-directory of images per person.
    pub dataset_dir: PathBuf,
    /// Gallery of reference encodings (JSON).
    pub gallery_path: PathBuf,
    /// Attendance table (CSV).
    pub attendance_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub recognizer_model: String,
    /// Primary distance gate.
    pub tolerance: f32,
    /// Stricter distance cap applied on top of `tolerance`.
    pub confirmation_cap: f32,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
}

/// The TOML file layer. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    data_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    gallery_path: Option<PathBuf>,
    attendance_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    detector_model: Option<String>,
    recognizer_model: Option<String>,
    tolerance: Option<f32>,
    confirmation_cap: Option<f32>,
    warmup_frames: Option<usize>,
}

impl Config {
    /// Load configuration from an optional TOML file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let file: FileConfig = toml::from_str(&raw)?;
                tracing::debug!(path = %path.display(), "loaded config file");
                file
            }
            None => FileConfig::default(),
        };

        let config = Self::resolve(file, &|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn resolve(file: FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Self {
        let path_var = |key: &str| env(key).map(PathBuf::from);

        let data_dir = path_var("ROLLCALL_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or_else(rollcall_core::default_data_dir);

        Self {
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            dataset_dir: path_var("ROLLCALL_DATASET_DIR")
                .or(file.dataset_dir)
                .unwrap_or_else(|| data_dir.join("dataset")),
            gallery_path: path_var("ROLLCALL_GALLERY_PATH")
                .or(file.gallery_path)
                .unwrap_or_else(|| data_dir.join("encodings").join("face_encodings.json")),
            attendance_path: path_var("ROLLCALL_ATTENDANCE_PATH")
                .or(file.attendance_path)
                .unwrap_or_else(|| data_dir.join("attendance").join("attendance.csv")),
            model_dir: path_var("ROLLCALL_MODEL_DIR")
                .or(file.model_dir)
                .unwrap_or_else(|| data_dir.join("models")),
            detector_model: env("ROLLCALL_DETECTOR_MODEL")
                .or(file.detector_model)
                .unwrap_or_else(|| "det_10g.onnx".to_string()),
            recognizer_model: env("ROLLCALL_RECOGNIZER_MODEL")
                .or(file.recognizer_model)
                .unwrap_or_else(|| "w600k_r50.onnx".to_string()),
            tolerance: parsed(env, "ROLLCALL_TOLERANCE")
                .or(file.tolerance)
                .unwrap_or(MatchPolicy::default().tolerance),
            confirmation_cap: parsed(env, "ROLLCALL_CONFIRMATION_CAP")
                .or(file.confirmation_cap)
                .unwrap_or(MatchPolicy::default().confirmation_cap),
            warmup_frames: parsed(env, "ROLLCALL_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(4),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("tolerance", self.tolerance),
            ("confirmation_cap", self.confirmation_cap),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        if self.confirmation_cap > self.tolerance {
            tracing::warn!(
                tolerance = self.tolerance,
                confirmation_cap = self.confirmation_cap,
                "confirmation cap is looser than tolerance; tolerance alone decides matches"
            );
        }
        Ok(())
    }

    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            tolerance: self.tolerance,
            confirmation_cap: self.confirmation_cap,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }
}

fn parsed<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

use likeness_onnx::{default_model_dir, DetectorModel, ARCFACE_DISTANCE_THRESHOLD};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Default signature store location.
    pub store_path: PathBuf,
    /// SCRFD variant used for detection.
    pub detector: DetectorModel,
    /// Maximum Euclidean distance for a match.
    pub threshold: f32,
    /// Worker threads; 0 means one per core.
    pub workers: usize,
    /// Whether unmatched photos are copied into an `unknown` folder.
    pub keep_unknown: bool,
}

impl Config {
    /// Load configuration from `LIKENESS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("LIKENESS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("likeness");

        let store_path = std::env::var("LIKENESS_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("signatures.json"));

        let detector = match std::env::var("LIKENESS_DETECTOR") {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                tracing::warn!(%err, "ignoring LIKENESS_DETECTOR");
                DetectorModel::default()
            }),
            Err(_) => DetectorModel::default(),
        };

        Self {
            model_dir,
            store_path,
            detector,
            threshold: env_f32("LIKENESS_THRESHOLD", ARCFACE_DISTANCE_THRESHOLD),
            workers: env_usize("LIKENESS_WORKERS", 0),
            keep_unknown: std::env::var("LIKENESS_KEEP_UNKNOWN")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

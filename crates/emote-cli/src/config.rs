use emote_core::FaceSelection;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lower bound on the poll interval.
const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Runtime configuration: defaults, then `EMOTE_*` environment variables,
/// then an optional TOML file, then command-line flags.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width; the driver may negotiate another.
    pub capture_width: u32,
    /// Requested capture height.
    pub capture_height: u32,
    /// Frames to discard after the stream starts (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Longest a single camera dequeue may block.
    pub dequeue_timeout_ms: u64,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Delay between poll ticks.
    pub poll_interval_ms: u64,
    /// Minimum detector confidence.
    pub score_threshold: f32,
    /// Which face drives the label when several are found.
    pub face_selection: FaceSelection,
    /// Show "No face detected" for still images without faces.
    pub no_face_label: bool,
    /// Directory snapshots are written to.
    pub snapshot_dir: PathBuf,
}

/// Optional keys accepted in the TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub capture_width: Option<u32>,
    pub capture_height: Option<u32>,
    pub warmup_frames: Option<usize>,
    pub dequeue_timeout_ms: Option<u64>,
    pub model_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub score_threshold: Option<f32>,
    #[serde(default, deserialize_with = "face_selection_from_str")]
    pub face_selection: Option<FaceSelection>,
    pub no_face_label: Option<bool>,
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("score_threshold must be within [0, 1], got {0}")]
    ScoreThreshold(f32),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            warmup_frames: 4,
            dequeue_timeout_ms: 1000,
            model_dir: emote_core::default_model_dir(),
            poll_interval_ms: 200,
            score_threshold: 0.5,
            face_selection: FaceSelection::First,
            no_face_label: true,
            snapshot_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from `EMOTE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            camera_device: var("EMOTE_CAMERA_DEVICE").unwrap_or(d.camera_device),
            capture_width: parse_var(&var, "EMOTE_CAPTURE_WIDTH").unwrap_or(d.capture_width),
            capture_height: parse_var(&var, "EMOTE_CAPTURE_HEIGHT").unwrap_or(d.capture_height),
            warmup_frames: parse_var(&var, "EMOTE_WARMUP_FRAMES").unwrap_or(d.warmup_frames),
            dequeue_timeout_ms: parse_var(&var, "EMOTE_DEQUEUE_TIMEOUT_MS").unwrap_or(d.dequeue_timeout_ms),
            model_dir: var("EMOTE_MODEL_DIR").map(PathBuf::from).unwrap_or(d.model_dir),
            poll_interval_ms: parse_var(&var, "EMOTE_POLL_INTERVAL_MS").unwrap_or(d.poll_interval_ms),
            score_threshold: parse_var(&var, "EMOTE_SCORE_THRESHOLD").unwrap_or(d.score_threshold),
            face_selection: var("EMOTE_FACE_SELECTION")
                .and_then(|v| parse_face_selection(&v))
                .unwrap_or(d.face_selection),
            no_face_label: var("EMOTE_NO_FACE_LABEL")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(d.no_face_label),
            snapshot_dir: var("EMOTE_SNAPSHOT_DIR").map(PathBuf::from).unwrap_or(d.snapshot_dir),
        }
    }

    /// Environment config overlaid with `path`, if given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_env();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
            config.apply(file);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, file: FileConfig) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        overlay!(
            camera_device,
            capture_width,
            capture_height,
            warmup_frames,
            dequeue_timeout_ms,
            model_dir,
            poll_interval_ms,
            score_threshold,
            face_selection,
            no_face_label,
            snapshot_dir
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(ConfigError::ScoreThreshold(self.score_threshold));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(emote_core::engine::DETECTOR_MODEL_FILE)
    }

    pub fn expression_model_path(&self) -> PathBuf {
        self.model_dir.join(emote_core::engine::EXPRESSION_MODEL_FILE)
    }
}

/// Accepted spellings for the face selection policy, shared by the
/// environment, the TOML file and the command line.
pub fn parse_face_selection(s: &str) -> Option<FaceSelection> {
    match s.trim().to_ascii_lowercase().as_str() {
        "first" => Some(FaceSelection::First),
        "largest_face" | "largest" => Some(FaceSelection::LargestFace),
        "most_confident" | "confident" => Some(FaceSelection::MostConfident),
        _ => None,
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn face_selection_from_str<'de, D>(deserializer: D) -> Result<Option<FaceSelection>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_face_selection(&s).map(Some).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "unknown face_selection '{s}' (first, largest_face, most_confident)"
        ))
    })
}

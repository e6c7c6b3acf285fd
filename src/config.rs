//! Configuration for the Watchpost monitoring agent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the monitoring agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cameras (or recordings) to monitor
    pub video_sources: Vec<VideoSourceConfig>,

    /// Microphone (or recording); `None` disables audio capture
    pub audio: Option<AudioSourceConfig>,

    /// Capture rates, frame size and evidence lengths
    pub capture: CaptureConfig,

    /// Detection pipelines and their source bindings
    pub detection: DetectionConfig,

    /// Where detection capabilities are loaded from
    pub capabilities: CapabilityConfig,

    /// Path for the alert store, evidence clips and statistics
    pub data_path: PathBuf,

    /// Skip capability loading and detection; capture and buffering only
    pub safe_mode: bool,

    /// Upper bound for joining workers on stop
    #[serde(with = "duration_millis")]
    pub stop_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("watchpost");

        Self {
            video_sources: (0..3)
                .map(|i| VideoSourceConfig::TestPattern {
                    name: format!("camera-{i}"),
                })
                .collect(),
            audio: Some(AudioSourceConfig::Silence),
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            capabilities: CapabilityConfig::default(),
            data_path: data_dir,
            safe_mode: false,
            stop_timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("watchpost")
            .join("config.json")
    }

    /// Check values that would otherwise fail deep inside a capture thread.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.fps == 0 || capture.audio_chunks_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "capture rates must be non-zero".to_string(),
            ));
        }
        if capture.frame_width == 0 || capture.frame_height == 0 {
            return Err(ConfigError::Invalid(
                "frame size must be non-zero".to_string(),
            ));
        }
        if capture.audio_chunk_len() == 0 {
            return Err(ConfigError::Invalid(
                "audio sample rate must be at least the chunk rate".to_string(),
            ));
        }
        if self.detection.speech.window_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "speech window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the persisted alert collection.
    pub fn alerts_path(&self) -> PathBuf {
        self.data_path.join("alerts.json")
    }

    /// Directory for video evidence clips.
    pub fn video_evidence_dir(&self) -> PathBuf {
        self.data_path.join("evidence").join("video")
    }

    /// Directory for audio evidence clips.
    pub fn audio_evidence_dir(&self) -> PathBuf {
        self.data_path.join("evidence").join("audio")
    }

    /// Path of the persisted runtime statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [
            self.data_path.clone(),
            self.video_evidence_dir(),
            self.audio_evidence_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }
}

/// A video input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoSourceConfig {
    /// Directory of still frames played in file-name order
    ImageSequence {
        dir: PathBuf,
        #[serde(default)]
        looped: bool,
    },
    /// Generated frames
    TestPattern { name: String },
}

impl VideoSourceConfig {
    /// Short label for logs and status output.
    pub fn label(&self) -> String {
        match self {
            VideoSourceConfig::ImageSequence { dir, .. } => dir.display().to_string(),
            VideoSourceConfig::TestPattern { name } => name.clone(),
        }
    }
}

/// An audio input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioSourceConfig {
    /// Little-endian f32 mono samples
    RawPcm {
        path: PathBuf,
        #[serde(default)]
        looped: bool,
    },
    /// Generated silence
    Silence,
}

/// Capture rates, frame geometry and evidence lengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    /// Seconds of video kept for evidence
    pub video_evidence_secs: u64,
    pub audio_sample_rate: u32,
    pub audio_chunks_per_sec: u32,
    /// Seconds of audio kept for evidence
    pub audio_evidence_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            fps: 30,
            video_evidence_secs: 10,
            audio_sample_rate: 16_000,
            audio_chunks_per_sec: 10,
            audio_evidence_secs: 10,
        }
    }
}

impl CaptureConfig {
    /// Samples per audio chunk.
    pub fn audio_chunk_len(&self) -> usize {
        if self.audio_chunks_per_sec == 0 {
            return 0;
        }
        (self.audio_sample_rate / self.audio_chunks_per_sec) as usize
    }

    pub fn video_buffer_capacity(&self) -> usize {
        self.video_evidence_secs as usize * self.fps as usize
    }

    pub fn audio_buffer_capacity(&self) -> usize {
        self.audio_evidence_secs as usize * self.audio_chunks_per_sec as usize
    }
}

/// Detection pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Index into `video_sources` watched for physical contact
    pub contact_source: usize,
    /// Index into `video_sources` watched for disappearing items
    pub theft_source: usize,
    /// Index into `video_sources` whose clip accompanies speech alerts
    pub speech_video_source: usize,
    pub contact: ContactConfig,
    pub theft: TheftConfig,
    pub speech: SpeechConfig,
    pub pacing: WorkerPacing,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            contact_source: 2,
            theft_source: 0,
            speech_video_source: 0,
            contact: ContactConfig::default(),
            theft: TheftConfig::default(),
            speech: SpeechConfig::default(),
            pacing: WorkerPacing::default(),
        }
    }
}

/// Contact heuristic thresholds, in pixels of the captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Minimum keypoint confidence considered
    pub min_confidence: f32,
    /// Maximum shoulder/hip distance between two people
    pub proximity_px: f32,
    /// Maximum wrist-to-torso distance counted as contact
    pub contact_px: f32,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            proximity_px: 30.0,
            contact_px: 20.0,
        }
    }
}

/// Object presence tracking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TheftConfig {
    /// Object classes eligible for tracking
    pub watched_classes: Vec<String>,
    /// Minimum detector confidence for an object to be tracked
    pub min_confidence: f32,
    /// Absence longer than this marks an object missing
    #[serde(with = "duration_millis")]
    pub grace_period: Duration,
    /// Width of a position bucket in pixels
    pub position_bucket_px: f32,
    /// Width of a size bucket in square pixels
    pub size_bucket_px2: f32,
}

impl Default for TheftConfig {
    fn default() -> Self {
        Self {
            watched_classes: [
                "chair",
                "laptop",
                "cell phone",
                "keyboard",
                "mouse",
                "cup",
                "bottle",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_confidence: 0.5,
            grace_period: Duration::from_secs(3),
            position_bucket_px: 20.0,
            size_bucket_px2: 500.0,
        }
    }
}

/// Speech screening parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Length of each transcribed window in seconds
    pub window_secs: f64,
    /// Flagged terms, matched case-insensitively
    pub lexicon: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            window_secs: 5.0,
            lexicon: Vec::new(),
        }
    }
}

/// Worker loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPacing {
    #[serde(with = "duration_millis")]
    pub contact_interval: Duration,
    #[serde(with = "duration_millis")]
    pub theft_interval: Duration,
    /// Speech reads a queued feed, so this must keep up with the chunk rate
    #[serde(with = "duration_millis")]
    pub speech_interval: Duration,
    /// Delay before retrying when no new sample is available
    #[serde(with = "duration_millis")]
    pub idle_retry: Duration,
    /// Delay after a failed iteration
    #[serde(with = "duration_millis")]
    pub error_backoff: Duration,
}

impl Default for WorkerPacing {
    fn default() -> Self {
        Self {
            contact_interval: Duration::from_millis(50),
            theft_interval: Duration::from_millis(100),
            speech_interval: Duration::from_millis(50),
            idle_retry: Duration::from_millis(20),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Where detection capabilities come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// JSON-lines pose annotations keyed by frame index
    pub pose_annotations: Option<PathBuf>,
    /// JSON-lines object annotations keyed by frame index
    pub object_annotations: Option<PathBuf>,
    /// Plain-text transcripts, one line per speech window
    pub transcripts: Option<PathBuf>,
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.video_sources.len(), 3);
        assert_eq!(config.detection.contact_source, 2);
        assert_eq!(config.detection.theft_source, 0);
        assert_eq!(config.detection.theft.grace_period, Duration::from_secs(3));
        assert_eq!(config.stop_timeout, Duration::from_secs(2));
        assert!(!config.safe_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capture_capacities() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.video_buffer_capacity(), 300);
        assert_eq!(capture.audio_buffer_capacity(), 100);
        assert_eq!(capture.audio_chunk_len(), 1_600);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.safe_mode = true;
        config.video_sources = vec![VideoSourceConfig::ImageSequence {
            dir: PathBuf::from("/srv/frames"),
            looped: true,
        }];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.safe_mode);
        assert_eq!(loaded.video_sources, config.video_sources);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "safe_mode": true, "detection": { "theft": { "grace_period": 1500 } } }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.safe_mode);
        assert_eq!(
            config.detection.theft.grace_period,
            Duration::from_millis(1500)
        );
        assert_eq!(config.detection.contact.contact_px, 20.0);
    }

    #[test]
    fn test_invalid_rates_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "capture": { "fps": 0 } }"#).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.capture.fps, 30);
    }
}

//! Detection pipelines for the monitoring agent.
//!
//! Inference itself is delegated to capability providers behind narrow
//! traits. The pipelines in this module turn their raw output into
//! yes/no detections:
//! - Contact: proximity, orientation and wrist placement of people
//! - Theft: persistence and absence of watched objects over time
//! - Speech: transcripts screened against a lexicon

pub mod contact;
pub mod replay;
pub mod speech;
pub mod theft;

use crate::alerts::AlertKind;
use crate::capture::{Sample, VideoFrame};
use crate::config::CapabilityConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Re-export commonly used types
pub use contact::{check_contact, ContactPipeline};
pub use replay::{AnnotationReplay, FrameAnnotation, TranscriptReplay};
pub use speech::{Lexicon, SpeechPipeline, SpeechWindow};
pub use theft::{ObjectKey, ObjectPresenceTracker, TheftPipeline, TrackedObject};

/// One body landmark reported by a pose detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn distance(&self, other: &Keypoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<[f32; 3]> for Keypoint {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Keypoint> for [f32; 3] {
    fn from(k: Keypoint) -> Self {
        [k.x, k.y, k.confidence]
    }
}

/// Keypoints of one person, indexed in COCO order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonPose {
    pub keypoints: Vec<Keypoint>,
}

impl PersonPose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    /// Keypoint `index` if present and at least `min_confidence` confident.
    pub fn confident(&self, index: usize, min_confidence: f32) -> Option<&Keypoint> {
        self.keypoints
            .get(index)
            .filter(|k| k.confidence >= min_confidence)
    }
}

/// Axis-aligned box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }
}

/// One object reported by an object detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Finds people and their body landmarks.
pub trait PoseCapability: Send + Sync {
    fn detect(&self, frame: &VideoFrame) -> Result<Vec<PersonPose>, DetectionError>;
}

/// Finds labelled objects.
pub trait ObjectCapability: Send + Sync {
    fn detect(&self, frame: &VideoFrame) -> Result<Vec<ObjectDetection>, DetectionError>;
}

/// Turns speech into text.
pub trait SpeechCapability: Send + Sync {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, DetectionError>;
}

/// Detection capabilities resolved at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub pose: Arc<dyn PoseCapability>,
    pub objects: Arc<dyn ObjectCapability>,
    /// Speech screening is skipped when absent
    pub speech: Option<Arc<dyn SpeechCapability>>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("speech", &self.speech.is_some())
            .finish_non_exhaustive()
    }
}

/// Load the configured capability providers.
///
/// Pose and object detection are required; speech is optional and a broken
/// transcript source only disables speech screening.
pub fn load_capabilities(config: &CapabilityConfig) -> Result<Capabilities, CapabilityError> {
    let pose_path = config
        .pose_annotations
        .as_ref()
        .ok_or(CapabilityError::NotConfigured("pose"))?;
    let object_path = config
        .object_annotations
        .as_ref()
        .ok_or(CapabilityError::NotConfigured("objects"))?;

    let pose = Arc::new(AnnotationReplay::load(pose_path).map_err(|e| CapabilityError::Load {
        capability: "pose",
        reason: e.to_string(),
    })?);
    let objects = if object_path == pose_path {
        pose.clone()
    } else {
        Arc::new(
            AnnotationReplay::load(object_path).map_err(|e| CapabilityError::Load {
                capability: "objects",
                reason: e.to_string(),
            })?,
        )
    };

    let speech: Option<Arc<dyn SpeechCapability>> = match &config.transcripts {
        Some(path) => match TranscriptReplay::load(path) {
            Ok(replay) => Some(Arc::new(replay)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Speech capability unavailable: {e}");
                None
            }
        },
        None => None,
    };

    Ok(Capabilities {
        pose,
        objects,
        speech,
    })
}

/// Outcome of one pipeline evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub detected: bool,
    pub description: String,
}

impl Detection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn positive(description: impl Into<String>) -> Self {
        Self {
            detected: true,
            description: description.into(),
        }
    }
}

/// A heuristic evaluated once per sample by a worker.
pub trait DetectionPipeline: Send + 'static {
    type Sample: Sample;

    /// Kind of alert raised on a positive detection.
    fn kind(&self) -> AlertKind;

    fn evaluate(&mut self, sample: &Self::Sample) -> Result<Detection, DetectionError>;
}

/// Errors reported by a capability during inference.
#[derive(Debug)]
pub enum DetectionError {
    Inference(String),
    InvalidInput(String),
}

impl std::fmt::Display for DetectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionError::Inference(e) => write!(f, "Inference failed: {e}"),
            DetectionError::InvalidInput(e) => write!(f, "Invalid input: {e}"),
        }
    }
}

impl std::error::Error for DetectionError {}

/// Errors that can occur while loading capabilities.
#[derive(Debug)]
pub enum CapabilityError {
    /// Loading was skipped on purpose (safe mode)
    Disabled,
    NotConfigured(&'static str),
    Load {
        capability: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityError::Disabled => write!(f, "Detection disabled (safe mode)"),
            CapabilityError::NotConfigured(c) => write!(f, "No {c} capability configured"),
            CapabilityError::Load { capability, reason } => {
                write!(f, "Failed to load {capability} capability: {reason}")
            }
        }
    }
}

impl std::error::Error for CapabilityError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_serde_as_triple() {
        let pose: PersonPose = serde_json::from_str("[[1.0, 2.0, 0.9], [3.0, 4.0, 0.1]]").unwrap();
        assert_eq!(pose.keypoints.len(), 2);
        assert_eq!(pose.keypoints[1], Keypoint::new(3.0, 4.0, 0.1));
        assert_eq!(
            serde_json::to_string(&pose).unwrap(),
            "[[1.0,2.0,0.9],[3.0,4.0,0.1]]"
        );
    }

    #[test]
    fn test_confident_keypoint_filter() {
        let pose = PersonPose::new(vec![Keypoint::new(0.0, 0.0, 0.4), Keypoint::new(1.0, 1.0, 0.5)]);
        assert!(pose.confident(0, 0.5).is_none());
        assert!(pose.confident(1, 0.5).is_some());
        assert!(pose.confident(7, 0.5).is_none());
    }

    #[test]
    fn test_bounding_box_geometry() {
        let bbox = BoundingBox::new(10.0, 20.0, 30.0, 60.0);
        assert_eq!(bbox.center(), (20.0, 40.0));
        assert_eq!(bbox.area(), 800.0);
    }

    #[test]
    fn test_missing_capability_config() {
        let err = load_capabilities(&CapabilityConfig::default()).unwrap_err();
        assert!(matches!(err, CapabilityError::NotConfigured("pose")));
    }

    #[test]
    fn test_unreadable_capability_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CapabilityConfig {
            pose_annotations: Some(dir.path().join("missing.jsonl")),
            object_annotations: Some(dir.path().join("missing.jsonl")),
            transcripts: None,
        };
        assert!(matches!(
            load_capabilities(&config),
            Err(CapabilityError::Load { capability: "pose", .. })
        ));
    }
}

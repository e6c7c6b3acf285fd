//! Replay capability providers.
//!
//! These serve pre-computed inference results, for example annotations
//! produced offline for a recorded image sequence. Each line of an annotation
//! file describes one frame:
//!
//! ```text
//! {"frame": 12, "people": [[[x, y, conf], ...]], "objects": [{"label": "cup", "bbox": {...}, "confidence": 0.8}]}
//! ```

use crate::capture::VideoFrame;
use crate::detection::{
    DetectionError, ObjectCapability, ObjectDetection, PersonPose, PoseCapability,
    SpeechCapability,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// Annotations for one frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnnotation {
    pub frame: u64,
    #[serde(default)]
    pub people: Vec<PersonPose>,
    #[serde(default)]
    pub objects: Vec<ObjectDetection>,
}

/// Serves pose and object annotations by frame index.
#[derive(Debug, Default)]
pub struct AnnotationReplay {
    frames: HashMap<u64, FrameAnnotation>,
    /// Frame count of a looping source; indices wrap around it
    period: Option<u64>,
}

impl AnnotationReplay {
    /// Load a JSON-lines annotation file.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, std::io::Error> {
        let mut frames = HashMap::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let annotation: FrameAnnotation = serde_json::from_str(line).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("line {}: {e}", line_no + 1),
                )
            })?;
            frames.insert(annotation.frame, annotation);
        }
        Ok(Self {
            frames,
            period: None,
        })
    }

    pub fn from_annotations(annotations: impl IntoIterator<Item = FrameAnnotation>) -> Self {
        Self {
            frames: annotations.into_iter().map(|a| (a.frame, a)).collect(),
            period: None,
        }
    }

    /// Wrap frame indices for a source that loops every `frames` frames.
    pub fn with_period(mut self, frames: u64) -> Self {
        self.period = (frames > 0).then_some(frames);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn lookup(&self, index: u64) -> Option<&FrameAnnotation> {
        let index = match self.period {
            Some(period) => index % period,
            None => index,
        };
        self.frames.get(&index)
    }
}

impl PoseCapability for AnnotationReplay {
    fn detect(&self, frame: &VideoFrame) -> Result<Vec<PersonPose>, DetectionError> {
        Ok(self
            .lookup(frame.index)
            .map(|a| a.people.clone())
            .unwrap_or_default())
    }
}

impl ObjectCapability for AnnotationReplay {
    fn detect(&self, frame: &VideoFrame) -> Result<Vec<ObjectDetection>, DetectionError> {
        Ok(self
            .lookup(frame.index)
            .map(|a| a.objects.clone())
            .unwrap_or_default())
    }
}

/// Serves transcripts in order, one line per analysed window.
#[derive(Debug, Default)]
pub struct TranscriptReplay {
    lines: Mutex<VecDeque<String>>,
}

impl TranscriptReplay {
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_lines(content.lines()))
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }
}

impl SpeechCapability for TranscriptReplay {
    fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String, DetectionError> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| DetectionError::Inference("transcript queue poisoned".to_string()))?;
        Ok(lines.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    const ANNOTATIONS: &str = r#"
{"frame": 0, "objects": [{"label": "laptop", "bbox": {"x1": 0, "y1": 0, "x2": 40, "y2": 30}, "confidence": 0.9}]}
{"frame": 2, "people": [[[1, 2, 0.9], [3, 4, 0.8]]]}
"#;

    fn frame(index: u64) -> VideoFrame {
        VideoFrame::new(index, RgbImage::new(2, 2))
    }

    #[test]
    fn test_parse_and_lookup() {
        let replay = AnnotationReplay::parse(ANNOTATIONS).unwrap();
        assert_eq!(replay.len(), 2);

        let objects = ObjectCapability::detect(&replay, &frame(0)).unwrap();
        assert_eq!(objects[0].label, "laptop");
        assert!(PoseCapability::detect(&replay, &frame(0)).unwrap().is_empty());

        let people = PoseCapability::detect(&replay, &frame(2)).unwrap();
        assert_eq!(people[0].keypoints.len(), 2);

        assert!(ObjectCapability::detect(&replay, &frame(99)).unwrap().is_empty());
    }

    #[test]
    fn test_period_wraps_indices() {
        let replay = AnnotationReplay::parse(ANNOTATIONS).unwrap().with_period(3);
        assert_eq!(ObjectCapability::detect(&replay, &frame(3)).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = AnnotationReplay::parse("{\"frame\": 0}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_transcripts_in_order() {
        let replay = TranscriptReplay::from_lines(["first", "second"]);
        assert_eq!(replay.transcribe(&[], 16_000).unwrap(), "first");
        assert_eq!(replay.transcribe(&[], 16_000).unwrap(), "second");
        assert_eq!(replay.transcribe(&[], 16_000).unwrap(), "");
    }
}
